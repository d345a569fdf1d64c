//! CL diff engine: which groups need testing, and which recorded patchsets
//! were superseded.

use std::collections::BTreeMap;

use crate::gerrit::{Change, ChangeId};
use crate::multipart::ChangeGroup;
use crate::store::Snapshot;

fn needs_testing(previous: &Snapshot, change: &Change) -> bool {
    match previous.recorded_patchset(&change.id()) {
        None => true,
        Some(recorded) => change.patchset > recorded,
    }
}

/// The subset of `current` that must be (re-)tested.
///
/// A change needs testing when it is absent from `previous` or carries a
/// strictly greater patchset than recorded. A group needs testing when any
/// member does: the parts are tested together, so one new patchset re-tests
/// the whole set. Output order preserves `current` order.
///
/// Changes recorded in `previous` but gone from `current` (abandoned or
/// merged) are dropped without a removal event; only supersession by a
/// newer patchset feeds build cleanup.
pub fn new_groups(previous: &Snapshot, current: &[ChangeGroup]) -> Vec<ChangeGroup> {
    current
        .iter()
        .filter(|group| group.changes().iter().any(|c| needs_testing(previous, c)))
        .cloned()
        .collect()
}

/// Recorded changes superseded by a newer patchset in `current`, mapped to
/// the patchset we had recorded. Builds still running against those
/// patchsets are candidates for cancellation.
///
/// Supersession is a per-change property, so this walks the raw query
/// result: a change still gets its stale build cancelled even when its
/// multi-part group was withheld from testing.
pub fn outdated_changes(previous: &Snapshot, current: &[Change]) -> BTreeMap<ChangeId, u32> {
    let mut outdated = BTreeMap::new();
    for change in current {
        if let Some(recorded) = previous.recorded_patchset(&change.id()) {
            if change.patchset > recorded {
                outdated.insert(change.id(), recorded);
            }
        }
    }
    outdated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gerrit::MultiPartInfo;
    use crate::multipart::group_changes;

    fn change(number: u64, project: &str, patchset: u32) -> Change {
        Change {
            number,
            project: project.to_string(),
            subject: String::new(),
            patchset,
            multi_part: None,
        }
    }

    fn part(number: u64, project: &str, patchset: u32, index: u32, count: u32) -> Change {
        Change {
            multi_part: Some(MultiPartInfo {
                group_id: "g".to_string(),
                part_index: index,
                part_count: count,
            }),
            ..change(number, project, patchset)
        }
    }

    fn groups_of(changes: &[Change]) -> Vec<ChangeGroup> {
        let (groups, errors) = group_changes(changes);
        assert!(errors.is_empty());
        groups
    }

    #[test]
    fn everything_is_new_against_empty_snapshot() {
        let current = groups_of(&[change(1, "x", 1)]);
        let result = new_groups(&Snapshot::default(), &current);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].changes()[0].number, 1);
    }

    #[test]
    fn recorded_patchset_is_not_retested() {
        let seen = [change(1, "x", 1)];
        let previous = Snapshot::from_changes(&seen);

        assert!(new_groups(&previous, &groups_of(&seen)).is_empty());
        assert!(outdated_changes(&previous, &seen).is_empty());
    }

    #[test]
    fn newer_patchset_is_retested_and_marks_old_one_outdated() {
        let previous = Snapshot::from_changes(&[change(1, "x", 1)]);
        let current = [change(1, "x", 2)];

        let result = new_groups(&previous, &groups_of(&current));
        assert_eq!(result.len(), 1);

        let outdated = outdated_changes(&previous, &current);
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[&change(1, "x", 2).id()], 1);
    }

    #[test]
    fn monotonic_supersession() {
        // Once patchset 3 is recorded, patchset 3 (or anything lower) never
        // needs testing again.
        let previous = Snapshot::from_changes(&[change(1, "x", 3)]);
        for patchset in [1, 2, 3] {
            let current = groups_of(&[change(1, "x", patchset)]);
            assert!(new_groups(&previous, &current).is_empty(), "ps{patchset}");
        }
    }

    #[test]
    fn one_new_part_retests_the_whole_group() {
        let previous = Snapshot::from_changes(&[
            part(10, "a", 1, 1, 2),
            part(20, "b", 1, 2, 2),
        ]);
        let current = [part(10, "a", 1, 1, 2), part(20, "b", 2, 2, 2)];

        let result = new_groups(&previous, &groups_of(&current));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].changes().len(), 2);

        let outdated = outdated_changes(&previous, &current);
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[&part(20, "b", 2, 2, 2).id()], 1);
    }

    #[test]
    fn superseded_part_of_a_withheld_group_is_still_outdated() {
        // The group is incomplete this run, but the stale build for the
        // old patchset still deserves cancellation.
        let previous = Snapshot::from_changes(&[part(10, "a", 1, 1, 2)]);
        let current = [part(10, "a", 2, 1, 2)];

        let (groups, errors) = group_changes(&current);
        assert!(groups.is_empty());
        assert_eq!(errors.len(), 1);

        let outdated = outdated_changes(&previous, &current);
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[&part(10, "a", 2, 1, 2).id()], 1);
    }

    #[test]
    fn diff_is_idempotent_and_order_preserving() {
        let previous = Snapshot::from_changes(&[change(2, "x", 1)]);
        let current = groups_of(&[change(5, "y", 1), change(2, "x", 2), change(9, "z", 4)]);

        let first = new_groups(&previous, &current);
        let second = new_groups(&previous, &current);
        assert_eq!(first, second);

        let numbers: Vec<u64> = first
            .iter()
            .map(|group| group.changes()[0].number)
            .collect();
        assert_eq!(numbers, vec![5, 2, 9]);
    }

    #[test]
    fn vanished_changes_are_dropped_silently() {
        let previous = Snapshot::from_changes(&[change(1, "x", 1), change(2, "x", 1)]);
        let current = [change(1, "x", 1)];

        assert!(new_groups(&previous, &groups_of(&current)).is_empty());
        assert!(outdated_changes(&previous, &current).is_empty());
    }
}
