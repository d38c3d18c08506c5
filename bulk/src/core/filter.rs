//! File acceptance predicates applied to scanned paths.
//!
//! A [`FilePredicate`] is a pure function of the file extension, the file stem
//! and ancestor directory names. It holds an explicit list of [`AcceptRule`]s
//! (a file is accepted when any rule accepts it) plus a [`ParticipantFilter`]
//! evaluated against one ancestor directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One naming convention: extension, allowed stem prefixes, required stem suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptRule {
    extension: String,
    prefixes: Vec<String>,
    suffix: String,
}

impl AcceptRule {
    /// Build a rule. A leading `.` on `extension` is ignored; an empty prefix
    /// list or empty suffix matches any stem.
    pub fn new(extension: &str, prefixes: Vec<String>, suffix: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            prefixes,
            suffix: suffix.to_string(),
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        // Extension first: it rejects the bulk of a scanned tree.
        if path.extension().and_then(|ext| ext.to_str()) != Some(self.extension.as_str()) {
            return false;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            return false;
        };
        let prefix_ok = self.prefixes.is_empty()
            || self
                .prefixes
                .iter()
                .any(|prefix| stem.starts_with(prefix.as_str()));
        prefix_ok && stem.ends_with(self.suffix.as_str())
    }
}

/// Participant allow-list, or the include-all sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantFilter {
    All,
    Only(BTreeSet<String>),
}

impl ParticipantFilter {
    pub fn includes(&self, participant: &str) -> bool {
        match self {
            ParticipantFilter::All => true,
            ParticipantFilter::Only(ids) => ids.contains(participant),
        }
    }
}

impl From<Option<Vec<String>>> for ParticipantFilter {
    fn from(ids: Option<Vec<String>>) -> Self {
        match ids {
            None => ParticipantFilter::All,
            Some(ids) => ParticipantFilter::Only(ids.into_iter().collect()),
        }
    }
}

/// Combined acceptance predicate for scanned files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePredicate {
    pub rules: Vec<AcceptRule>,
    pub participants: ParticipantFilter,
    /// Ancestor offset holding the participant id (1 = the file's parent directory).
    pub participant_ancestor: usize,
}

impl FilePredicate {
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.rules.iter().any(|rule| rule.accepts(path)) {
            return false;
        }
        match self.participants {
            ParticipantFilter::All => true,
            ParticipantFilter::Only(_) => ancestor_name(path, self.participant_ancestor)
                .is_some_and(|id| self.participants.includes(id)),
        }
    }
}

/// Keep the paths accepted by `predicate`, preserving input order.
pub fn filter<'a, I>(paths: I, predicate: &'a FilePredicate) -> impl Iterator<Item = PathBuf> + 'a
where
    I: IntoIterator<Item = PathBuf>,
    I::IntoIter: 'a,
{
    paths.into_iter().filter(move |path| predicate.accepts(path))
}

/// Name of the ancestor directory `offset` levels above `path` (1 = parent).
pub fn ancestor_name(path: &Path, offset: usize) -> Option<&str> {
    if offset == 0 {
        return None;
    }
    path.ancestors()
        .nth(offset)
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imu_rule() -> AcceptRule {
        AcceptRule::new(
            "sto",
            vec!["data_l_".to_string(), "data_r_".to_string()],
            "_orientations",
        )
    }

    fn predicate(participants: ParticipantFilter) -> FilePredicate {
        FilePredicate {
            rules: vec![imu_rule()],
            participants,
            participant_ancestor: 2,
        }
    }

    #[test]
    fn rule_checks_extension_prefix_and_suffix() {
        let rule = imu_rule();
        assert!(rule.accepts(Path::new("in/08/t1/data_l_comf_01_orientations.sto")));
        assert!(!rule.accepts(Path::new("in/08/t1/data_l_comf_01_orientations.mot")));
        assert!(!rule.accepts(Path::new("in/08/t1/data_x_comf_01_orientations.sto")));
        assert!(!rule.accepts(Path::new("in/08/t1/data_l_comf_01.sto")));
    }

    #[test]
    fn rule_with_leading_dot_and_no_prefixes() {
        let rule = AcceptRule::new(".trc", Vec::new(), "");
        assert!(rule.accepts(Path::new("a/b/anything.trc")));
        assert!(!rule.accepts(Path::new("a/b/anything")));
    }

    #[test]
    fn participant_taken_from_second_ancestor() {
        let only = ParticipantFilter::from(Some(vec!["08".to_string()]));
        let pred = predicate(only);
        assert!(pred.accepts(Path::new("in/08/t1/data_r_fast_02_orientations.sto")));
        assert!(!pred.accepts(Path::new("in/09/t1/data_r_fast_02_orientations.sto")));
    }

    #[test]
    fn include_all_ignores_missing_ancestor() {
        let pred = predicate(ParticipantFilter::All);
        assert!(pred.accepts(Path::new("data_r_fast_02_orientations.sto")));
    }

    #[test]
    fn any_rule_accepts() {
        let pred = FilePredicate {
            rules: vec![imu_rule(), AcceptRule::new("trc", vec!["l_".to_string()], "")],
            participants: ParticipantFilter::All,
            participant_ancestor: 2,
        };
        assert!(pred.accepts(Path::new("p/t/l_slow_03.trc")));
        assert!(pred.accepts(Path::new("p/t/data_l_slow_03_orientations.sto")));
        assert!(!pred.accepts(Path::new("p/t/r_slow_03.trc")));
    }

    #[test]
    fn filter_is_subset_and_idempotent() {
        let pred = predicate(ParticipantFilter::from(Some(vec!["08".to_string()])));
        let paths: Vec<PathBuf> = [
            "in/08/t1/data_l_comf_01_orientations.sto",
            "in/08/t1/notes.txt",
            "in/09/t1/data_l_comf_01_orientations.sto",
            "in/08/t2/data_r_slow_04_orientations.sto",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        let once: Vec<PathBuf> = filter(paths.clone(), &pred).collect();
        assert_eq!(once.len(), 2);
        assert!(once.iter().all(|path| paths.contains(path)));

        let twice: Vec<PathBuf> = filter(once.clone(), &pred).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn no_matches_is_empty() {
        let pred = predicate(ParticipantFilter::All);
        let paths = vec![PathBuf::from("a/b/readme.md")];
        assert_eq!(filter(paths, &pred).count(), 0);
    }

    #[test]
    fn ancestor_offsets() {
        let path = Path::new("root/08/trial/file.sto");
        assert_eq!(ancestor_name(path, 1), Some("trial"));
        assert_eq!(ancestor_name(path, 2), Some("08"));
        assert_eq!(ancestor_name(path, 0), None);
    }
}
