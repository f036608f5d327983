//! Selector matching.
//!
//! A selector entry is an ALL-of predicate over a workload's labels and
//! annotations; a list of entries combines them with OR. An entry with both
//! maps empty matches nothing — retention of everything in a namespace must
//! be asked for explicitly, never implied by an empty predicate.

use std::collections::BTreeMap;

use crate::domain::models::Selector;

/// True when every pair in the entry's maps is present verbatim in the
/// workload's metadata.
pub fn entry_matches(
    entry: &Selector,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> bool {
    if entry.is_empty() {
        return false;
    }
    let labels_ok = entry
        .match_labels
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v));
    let annotations_ok = entry
        .match_annotations
        .iter()
        .all(|(k, v)| annotations.get(k) == Some(v));
    labels_ok && annotations_ok
}

/// First entry in the list that matches, if any.
pub fn matching_entry<'a>(
    entries: &'a [Selector],
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Option<&'a Selector> {
    entries
        .iter()
        .find(|entry| entry_matches(entry, labels, annotations))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn all_pairs_must_match() {
        let entry = Selector {
            match_labels: map(&[("app", "myapp"), ("tier", "ci")]),
            match_annotations: BTreeMap::new(),
        };

        let labels = map(&[("app", "myapp"), ("tier", "ci"), ("extra", "x")]);
        assert!(entry_matches(&entry, &labels, &BTreeMap::new()));

        let partial = map(&[("app", "myapp")]);
        assert!(!entry_matches(&entry, &partial, &BTreeMap::new()));

        let wrong_value = map(&[("app", "myapp"), ("tier", "dev")]);
        assert!(!entry_matches(&entry, &wrong_value, &BTreeMap::new()));
    }

    #[test]
    fn labels_and_annotations_are_both_required() {
        let entry = Selector {
            match_labels: map(&[("app", "myapp")]),
            match_annotations: map(&[("team", "infra")]),
        };

        let labels = map(&[("app", "myapp")]);
        assert!(!entry_matches(&entry, &labels, &BTreeMap::new()));
        assert!(entry_matches(&entry, &labels, &map(&[("team", "infra")])));
    }

    #[test]
    fn empty_entry_matches_nothing() {
        let entry = Selector::default();
        let labels = map(&[("app", "myapp")]);
        assert!(!entry_matches(&entry, &labels, &BTreeMap::new()));
        assert!(!entry_matches(&entry, &BTreeMap::new(), &BTreeMap::new()));
    }

    #[test]
    fn entries_combine_with_or_first_wins() {
        let entries = vec![
            Selector {
                match_labels: map(&[("app", "other")]),
                ..Default::default()
            },
            Selector {
                match_labels: map(&[("app", "myapp")]),
                ..Default::default()
            },
        ];
        let labels = map(&[("app", "myapp")]);
        let hit = matching_entry(&entries, &labels, &BTreeMap::new()).unwrap();
        assert_eq!(hit.match_labels["app"], "myapp");

        assert!(matching_entry(&entries, &map(&[("app", "none")]), &BTreeMap::new()).is_none());
    }
}
