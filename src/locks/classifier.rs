//! LockClassifier: maps operations to PostgreSQL lock levels (spec §4.1).

use crate::locks::level::{BlockingPotential, LockLevel};
use crate::operation::{Operation, OperationKind};

/// Stateless classifier; a unit struct since classification depends only on
/// the operation's own kind and attributes, never on external state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockClassifier;

impl LockClassifier {
    pub fn new() -> Self {
        Self
    }

    /// `classify(op) -> LockLevel` from spec §4.1's rule table.
    pub fn classify(&self, op: &Operation) -> LockLevel {
        use OperationKind::*;
        match op.kind {
            AddIndex => {
                if op.attributes.concurrently == Some(true) {
                    LockLevel::ShareUpdateExclusive
                } else {
                    LockLevel::Share
                }
            }
            AddForeignKey => {
                if op.attributes.not_valid == Some(true) {
                    LockLevel::ShareRowExclusive
                } else {
                    LockLevel::AccessExclusive
                }
            }
            ValidateConstraint => LockLevel::ShareUpdateExclusive,
            AddColumn => {
                // Constant vs. volatile defaults both take ACCESS EXCLUSIVE on PG>=11;
                // the distinction (brief vs. long hold) is surfaced via risk scoring,
                // not a different lock level.
                LockLevel::AccessExclusive
            }
            DropTable | DropColumn | AlterColumnType | SetNotNull | DropConstraint
            | RenameColumn | RenameTable | CreateView | CreateTable | AddUnique | Backfill => {
                LockLevel::AccessExclusive
            }
        }
    }

    /// `conflicts(a, b) -> bool`: true iff the pair's classified levels conflict.
    pub fn conflicts(&self, a: &Operation, b: &Operation) -> bool {
        self.classify(a).conflicts_with(self.classify(b))
    }

    pub fn blocking_potential(&self, level: LockLevel) -> BlockingPotential {
        level.blocking_potential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Attributes, OperationId};

    fn op(kind: OperationKind, attrs: Attributes) -> Operation {
        Operation::new(OperationId(1), kind, "orders").with_attributes(attrs)
    }

    #[test]
    fn concurrent_index_is_share_update_exclusive() {
        let classifier = LockClassifier::new();
        let o = op(
            OperationKind::AddIndex,
            Attributes {
                concurrently: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(classifier.classify(&o), LockLevel::ShareUpdateExclusive);
    }

    #[test]
    fn non_concurrent_index_is_share() {
        let classifier = LockClassifier::new();
        let o = op(OperationKind::AddIndex, Attributes::default());
        assert_eq!(classifier.classify(&o), LockLevel::Share);
    }

    #[test]
    fn not_valid_foreign_key_is_share_row_exclusive() {
        let classifier = LockClassifier::new();
        let o = op(
            OperationKind::AddForeignKey,
            Attributes {
                not_valid: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(classifier.classify(&o), LockLevel::ShareRowExclusive);
    }

    #[test]
    fn validating_foreign_key_is_access_exclusive() {
        let classifier = LockClassifier::new();
        let o = op(OperationKind::AddForeignKey, Attributes::default());
        assert_eq!(classifier.classify(&o), LockLevel::AccessExclusive);
    }

    #[test]
    fn validate_constraint_is_share_update_exclusive() {
        let classifier = LockClassifier::new();
        let o = op(OperationKind::ValidateConstraint, Attributes::default());
        assert_eq!(classifier.classify(&o), LockLevel::ShareUpdateExclusive);
    }

    #[test]
    fn drop_table_defaults_to_access_exclusive() {
        let classifier = LockClassifier::new();
        let o = op(OperationKind::DropTable, Attributes::default());
        assert_eq!(classifier.classify(&o), LockLevel::AccessExclusive);
    }

    #[test]
    fn conflicts_delegates_to_lock_level_matrix() {
        let classifier = LockClassifier::new();
        let concurrent_index = op(
            OperationKind::AddIndex,
            Attributes {
                concurrently: Some(true),
                ..Default::default()
            },
        );
        let drop = op(OperationKind::DropTable, Attributes::default());
        assert!(classifier.conflicts(&concurrent_index, &drop));
    }
}
