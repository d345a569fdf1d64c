//! Multi-part grouping: collect changes that must be tested as one unit.
//!
//! A multi-part set spans several projects; testing a strict subset would
//! build an inconsistent tree, so incomplete sets are withheld entirely.
//! Grouping problems never abort the run; they are collected and reported
//! while unaffected groups proceed.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::gerrit::Change;

/// A problem with one multi-part set. Non-fatal: the affected group is
/// excluded from the result and the error surfaces in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("multi-part group {group_id:?} is missing part(s) {missing:?} of {part_count}")]
    Incomplete {
        group_id: String,
        part_count: u32,
        missing: Vec<u32>,
    },

    #[error("multi-part group {group_id:?} has two changes claiming part {part_index}")]
    DuplicatePart { group_id: String, part_index: u32 },

    #[error("multi-part group {group_id:?}: part index {part_index} is outside 1..={part_count}")]
    PartOutOfRange {
        group_id: String,
        part_index: u32,
        part_count: u32,
    },

    #[error("multi-part group {group_id:?} declares conflicting part counts ({first} vs {second})")]
    ConflictingPartCount {
        group_id: String,
        first: u32,
        second: u32,
    },

    #[error("multi-part group {group_id:?} has two parts from project {project:?}")]
    DuplicateProject { group_id: String, project: String },
}

/// One unit of testable work: a single change, or a complete multi-part set
/// ordered by part index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeGroup {
    changes: Vec<Change>,
}

impl ChangeGroup {
    fn singleton(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }

    /// Member changes; never empty.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Refs of every member, in part order.
    pub fn references(&self) -> Vec<String> {
        self.changes.iter().map(Change::reference).collect()
    }
}

/// Accumulates the parts of one multi-part set as the query result is walked.
struct PartialGroup {
    part_count: u32,
    parts: BTreeMap<u32, Change>,
    /// Set when the group's metadata is inconsistent; a poisoned group is
    /// never emitted and produces no further errors at emission time.
    poisoned: bool,
}

/// Partition `changes` into testable groups.
///
/// Changes without multi-part metadata become singleton groups. Changes
/// sharing a group id are emitted as one group only when parts
/// `1..=part_count` are all present exactly once. Group order follows first
/// appearance in `changes`; within a group, parts are ordered by index.
pub fn group_changes(changes: &[Change]) -> (Vec<ChangeGroup>, Vec<GroupError>) {
    enum Entry {
        Single(Change),
        Multi(String),
    }

    let mut order: Vec<Entry> = Vec::new();
    let mut partial: BTreeMap<String, PartialGroup> = BTreeMap::new();
    let mut errors: Vec<GroupError> = Vec::new();

    for change in changes {
        let info = match &change.multi_part {
            None => {
                order.push(Entry::Single(change.clone()));
                continue;
            }
            Some(info) => info,
        };

        let group = partial.entry(info.group_id.clone()).or_insert_with(|| {
            order.push(Entry::Multi(info.group_id.clone()));
            PartialGroup {
                part_count: info.part_count,
                parts: BTreeMap::new(),
                poisoned: false,
            }
        });

        if info.part_count != group.part_count {
            errors.push(GroupError::ConflictingPartCount {
                group_id: info.group_id.clone(),
                first: group.part_count,
                second: info.part_count,
            });
            group.poisoned = true;
            continue;
        }

        if info.part_index == 0 || info.part_index > info.part_count {
            errors.push(GroupError::PartOutOfRange {
                group_id: info.group_id.clone(),
                part_index: info.part_index,
                part_count: info.part_count,
            });
            group.poisoned = true;
            continue;
        }

        if group.parts.contains_key(&info.part_index) {
            // Later-seen duplicate: report it and keep the first occurrence.
            errors.push(GroupError::DuplicatePart {
                group_id: info.group_id.clone(),
                part_index: info.part_index,
            });
            continue;
        }

        // The parts of a set patch distinct repositories; two parts from one
        // project cannot be checked out together.
        if group.parts.values().any(|part| part.project == change.project) {
            errors.push(GroupError::DuplicateProject {
                group_id: info.group_id.clone(),
                project: change.project.clone(),
            });
            group.poisoned = true;
            continue;
        }

        group.parts.insert(info.part_index, change.clone());
    }

    let mut groups: Vec<ChangeGroup> = Vec::new();
    for entry in order {
        match entry {
            Entry::Single(change) => groups.push(ChangeGroup::singleton(change)),
            Entry::Multi(group_id) => {
                let group = &partial[&group_id];
                if group.poisoned {
                    continue;
                }

                let missing: Vec<u32> = (1..=group.part_count)
                    .filter(|index| !group.parts.contains_key(index))
                    .collect();
                if !missing.is_empty() {
                    debug!(
                        "withholding multi-part group {:?}: missing part(s) {:?}",
                        group_id, missing
                    );
                    errors.push(GroupError::Incomplete {
                        group_id,
                        part_count: group.part_count,
                        missing,
                    });
                    continue;
                }

                groups.push(ChangeGroup {
                    changes: group.parts.values().cloned().collect(),
                });
            }
        }
    }

    (groups, errors)
}
