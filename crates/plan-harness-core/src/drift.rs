//! Drift classification and aggregation.
//!
//! Each resource change falls into at most one of `replace`, `create`,
//! `update`, `delete`, `read`, chosen in that precedence order. `import`
//! is counted independently. `read`-only changes are never drift.
//!
//! [`should_notify`] implements the alert rule: notify only on a
//! transition from a clean plan to a drifted one, so drift that is
//! already known does not re-alert on every submission.

use serde::{Deserialize, Serialize};

use crate::models::{Action, ResourceChangeSummary};

/// Mutually exclusive category of a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftCategory {
    Replace,
    Create,
    Update,
    Delete,
    Read,
}

/// Classify a change's action list.
///
/// Returns `None` for no-op (or empty) changes.
pub fn classify(actions: &[Action]) -> Option<DriftCategory> {
    let has = |a: Action| actions.contains(&a);
    if has(Action::Create) && has(Action::Delete) {
        Some(DriftCategory::Replace)
    } else if has(Action::Create) {
        Some(DriftCategory::Create)
    } else if has(Action::Update) {
        Some(DriftCategory::Update)
    } else if has(Action::Delete) {
        Some(DriftCategory::Delete)
    } else if has(Action::Read) {
        Some(DriftCategory::Read)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftCounts {
    pub create: u64,
    pub update: u64,
    pub delete: u64,
    pub replace: u64,
    pub read: u64,
    pub import: u64,
}

impl DriftCounts {
    /// Changes that count as drift: everything except `read`.
    pub fn drift_total(&self) -> u64 {
        self.create + self.update + self.delete + self.replace + self.import
    }

    pub fn has_drift(&self) -> bool {
        self.drift_total() > 0
    }

    /// Count one change.
    pub fn record(&mut self, actions: &[Action]) {
        match classify(actions) {
            Some(DriftCategory::Replace) => self.replace += 1,
            Some(DriftCategory::Create) => self.create += 1,
            Some(DriftCategory::Update) => self.update += 1,
            Some(DriftCategory::Delete) => self.delete += 1,
            Some(DriftCategory::Read) => self.read += 1,
            None => {}
        }
        if actions.contains(&Action::Import) {
            self.import += 1;
        }
    }
}

/// Aggregate counts over a plan's changes.
pub fn summarize<'a>(changes: impl IntoIterator<Item = &'a ResourceChangeSummary>) -> DriftCounts {
    let mut counts = DriftCounts::default();
    for change in changes {
        counts.record(&change.actions);
    }
    counts
}

/// Whether a plan with `current` counts should raise a drift alert.
///
/// `previous` is the drift of the immediately preceding accepted plan for
/// the same component and environment. Only a clean → drifted transition
/// alerts; a first-ever plan has no baseline and does not.
pub fn should_notify(previous: Option<&DriftCounts>, current: &DriftCounts) -> bool {
    matches!(previous, Some(prev) if prev.drift_total() == 0) && current.drift_total() > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(actions: &[Action]) -> ResourceChangeSummary {
        ResourceChangeSummary {
            address: "x.y".into(),
            resource_type: "x".into(),
            name: "y".into(),
            resource_group: None,
            actions: actions.to_vec(),
        }
    }

    #[test]
    fn test_create_delete_is_replace() {
        let counts = summarize(&[change(&[Action::Create, Action::Delete])]);
        assert_eq!(counts.replace, 1);
        assert_eq!(counts.create, 0);
        assert_eq!(counts.delete, 0);
        assert!(counts.has_drift());

        let counts = summarize(&[change(&[Action::Delete, Action::Create])]);
        assert_eq!(counts.replace, 1);
    }

    #[test]
    fn test_all_no_op_has_no_drift() {
        let changes = vec![change(&[Action::NoOp]), change(&[Action::NoOp]), change(&[])];
        let counts = summarize(&changes);
        assert_eq!(counts, DriftCounts::default());
        assert!(!counts.has_drift());
    }

    #[test]
    fn test_read_is_not_drift() {
        let counts = summarize(&[change(&[Action::Read])]);
        assert_eq!(counts.read, 1);
        assert!(!counts.has_drift());
    }

    #[test]
    fn test_import_counts_alongside_category() {
        let counts = summarize(&[
            change(&[Action::Import, Action::Update]),
            change(&[Action::NoOp, Action::Import]),
        ]);
        assert_eq!(counts.update, 1);
        assert_eq!(counts.import, 2);
        assert_eq!(counts.drift_total(), 3);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(classify(&[Action::Update, Action::Create]), Some(DriftCategory::Create));
        assert_eq!(classify(&[Action::Delete, Action::Update]), Some(DriftCategory::Update));
        assert_eq!(classify(&[Action::Read, Action::Delete]), Some(DriftCategory::Delete));
        assert_eq!(classify(&[Action::NoOp]), None);
    }

    #[test]
    fn test_notify_only_on_transition() {
        let clean = DriftCounts::default();
        let drifted = DriftCounts {
            update: 2,
            ..Default::default()
        };
        let read_only = DriftCounts {
            read: 4,
            ..Default::default()
        };
        assert!(should_notify(Some(&clean), &drifted));
        assert!(should_notify(Some(&read_only), &drifted));
        assert!(!should_notify(Some(&drifted), &drifted));
        assert!(!should_notify(Some(&drifted), &clean));
        assert!(!should_notify(Some(&clean), &clean));
        assert!(!should_notify(None, &drifted));
    }
}
