//! Output layout: mirrored result directories, trial identity and filenames.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::core::filter::ancestor_name;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("{} is not under input root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Derive the output directory for `input` by re-rooting the last `depth`
/// segments of its parent directory (relative to `input_root`) under `output_root`.
///
/// Files sitting shallower than `depth` keep the segments they have.
pub fn mirror(
    input: &Path,
    input_root: &Path,
    output_root: &Path,
    depth: usize,
) -> Result<PathBuf, LayoutError> {
    let relative = input
        .strip_prefix(input_root)
        .map_err(|_| LayoutError::OutsideRoot {
            path: input.to_path_buf(),
            root: input_root.to_path_buf(),
        })?;
    let segments: Vec<&OsStr> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(name) => Some(name),
                    _ => None,
                })
                .collect::<Vec<&OsStr>>()
        })
        .unwrap_or_default();

    let skip = segments.len().saturating_sub(depth);
    let mut dir = output_root.to_path_buf();
    for segment in &segments[skip..] {
        dir.push(segment);
    }
    Ok(dir)
}

/// Typed identity of one input trial, threaded through every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialId {
    /// Participant directory name (empty when the path is too shallow).
    pub participant: String,
    /// Trial directory name (the file's parent).
    pub trial: String,
    /// File stem of the input.
    pub stem: String,
    /// Trial tag extracted from the stem (e.g. `l_comf_01`), if any.
    pub tag: Option<String>,
}

impl TrialId {
    pub fn from_path(path: &Path, participant_ancestor: usize, tagger: &TrialTagger) -> Self {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            participant: ancestor_name(path, participant_ancestor)
                .unwrap_or_default()
                .to_string(),
            trial: ancestor_name(path, 1).unwrap_or_default().to_string(),
            tag: tagger.tag(&stem),
            stem,
        }
    }

    /// Short display form: `participant/trial/stem`.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.participant, self.trial, self.stem)
    }
}

/// Extracts the trial tag from file stems.
#[derive(Debug, Clone)]
pub struct TrialTagger {
    pattern: Regex,
}

impl TrialTagger {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn tag(&self, stem: &str) -> Option<String> {
        self.pattern.find(stem).map(|m| m.as_str().to_string())
    }
}

/// Output filename convention:
/// `{prefix}_{trial stem}_{tuple labels}_{suffix}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameScheme {
    pub prefix: String,
    pub suffix: String,
    /// Fixed extension; `None` falls back to the caller-provided one.
    pub extension: Option<String>,
    pub separator: String,
}

impl NameScheme {
    pub fn stem<'a>(&self, trial_stem: &str, labels: impl IntoIterator<Item = &'a str>) -> String {
        let mut parts: Vec<&str> = vec![self.prefix.as_str(), trial_stem];
        for label in labels {
            parts.push(label);
        }
        parts.push(self.suffix.as_str());
        parts.retain(|part| !part.is_empty());
        parts.join(&self.separator)
    }

    pub fn file_name<'a>(
        &self,
        trial_stem: &str,
        labels: impl IntoIterator<Item = &'a str>,
        fallback_extension: Option<&str>,
    ) -> String {
        let stem = self.stem(trial_stem, labels);
        match self.extension.as_deref().or(fallback_extension) {
            Some(ext) if !ext.is_empty() => format!("{stem}.{}", ext.trim_start_matches('.')),
            _ => stem,
        }
    }
}
