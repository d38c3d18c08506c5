//! Cartesian expansion of configuration axes.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Serialize;

/// One selectable value on an axis, with the label used in output filenames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisOption {
    pub label: String,
    pub value: String,
}

/// An ordered, named dimension of variation (e.g. weighting schemes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationAxis {
    pub name: String,
    pub options: Vec<AxisOption>,
}

/// The option picked from one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub axis: String,
    pub label: String,
    pub value: String,
}

/// One selection per axis, in axis order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigurationTuple {
    pub choices: Vec<Choice>,
}

impl ConfigurationTuple {
    /// Concatenated option labels, used as the tuple identity in filenames.
    /// Empty labels contribute nothing to a filename, so they are left out here too.
    pub fn id(&self, separator: &str) -> String {
        self.labels()
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.choices.iter().map(|choice| choice.label.as_str())
    }

    pub fn get(&self, axis: &str) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.axis == axis)
    }

    /// Axis name to selected value.
    pub fn values(&self) -> BTreeMap<String, String> {
        self.choices
            .iter()
            .map(|choice| (choice.axis.clone(), choice.value.clone()))
            .collect()
    }
}

/// Full Cartesian product of `axes`; the first axis varies slowest.
///
/// Zero axes yield a single empty tuple. Any empty axis yields no tuples.
pub fn expand(axes: &[ConfigurationAxis]) -> Vec<ConfigurationTuple> {
    let mut tuples = vec![ConfigurationTuple::default()];
    for axis in axes {
        let mut next = Vec::with_capacity(tuples.len() * axis.options.len());
        for tuple in &tuples {
            for option in &axis.options {
                let mut choices = tuple.choices.clone();
                choices.push(Choice {
                    axis: axis.name.clone(),
                    label: option.label.clone(),
                    value: option.value.clone(),
                });
                next.push(ConfigurationTuple { choices });
            }
        }
        tuples = next;
    }
    tuples
}

/// Ids that appear more than once among `tuples`, in first-seen order.
pub fn colliding_ids(tuples: &[ConfigurationTuple], separator: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut collisions = Vec::new();
    for tuple in tuples {
        let id = tuple.id(separator);
        if !seen.insert(id.clone()) && reported.insert(id.clone()) {
            collisions.push(id);
        }
    }
    collisions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(name: &str, labels: &[&str]) -> ConfigurationAxis {
        ConfigurationAxis {
            name: name.to_string(),
            options: labels
                .iter()
                .map(|label| AxisOption {
                    label: label.to_string(),
                    value: format!("{label}.xml"),
                })
                .collect(),
        }
    }

    #[test]
    fn product_size_and_order() {
        let axes = [axis("model", &["a", "b"]), axis("weights", &["x", "y", "z"])];
        let tuples = expand(&axes);
        let ids: Vec<String> = tuples.iter().map(|tuple| tuple.id("_")).collect();
        assert_eq!(ids, vec!["a_x", "a_y", "a_z", "b_x", "b_y", "b_z"]);
        assert!(colliding_ids(&tuples, "_").is_empty());
    }

    #[test]
    fn three_axes_are_distinct_and_deterministic() {
        let axes = [
            axis("model", &["m1", "m2"]),
            axis("weights", &["w1", "w2", "w3"]),
            axis("filter", &["f1", "f2"]),
        ];
        let first = expand(&axes);
        let second = expand(&axes);
        assert_eq!(first.len(), 12);
        assert_eq!(first, second);
        let unique: HashSet<String> = first.iter().map(|tuple| tuple.id("_")).collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn single_axis_is_identity() {
        let axes = [axis("model", &["a", "b", "c"])];
        let tuples = expand(&axes);
        let labels: Vec<&str> = tuples
            .iter()
            .flat_map(|tuple| tuple.labels().collect::<Vec<_>>())
            .collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn no_axes_yields_one_empty_tuple() {
        let tuples = expand(&[]);
        assert_eq!(tuples, vec![ConfigurationTuple::default()]);
    }

    #[test]
    fn detects_label_collisions_across_axes() {
        let axes = [axis("model", &["a_b", "a"]), axis("weights", &["c", "b_c"])];
        let tuples = expand(&axes);
        assert_eq!(colliding_ids(&tuples, "_"), vec!["a_b_c".to_string()]);
    }

    #[test]
    fn empty_labels_collide_like_filenames() {
        let axes = [axis("a", &["", "p"]), axis("b", &["p", ""])];
        let tuples = expand(&axes);
        assert_eq!(tuples[0].id("_"), "p");
        assert_eq!(colliding_ids(&tuples, "_"), vec!["p".to_string()]);
    }

    #[test]
    fn values_map_by_axis_name() {
        let tuples = expand(&[axis("model", &["a"]), axis("weights", &["x"])]);
        let values = tuples[0].values();
        assert_eq!(values.get("weights").map(String::as_str), Some("x.xml"));
        assert_eq!(tuples[0].get("model").map(|c| c.label.as_str()), Some("a"));
    }
}
