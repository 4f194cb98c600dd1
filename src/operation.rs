//! The `Operation` domain type: an immutable description of a single schema change.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::locks::level::LockLevel;

/// Stable identifier for an operation within a single plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u32);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// One of the schema-change kinds the planner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumnType,
    AddIndex,
    AddUnique,
    AddForeignKey,
    ValidateConstraint,
    DropConstraint,
    CreateView,
    Backfill,
    SetNotNull,
    RenameColumn,
    RenameTable,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::CreateTable => "create_table",
            OperationKind::DropTable => "drop_table",
            OperationKind::AddColumn => "add_column",
            OperationKind::DropColumn => "drop_column",
            OperationKind::AlterColumnType => "alter_column_type",
            OperationKind::AddIndex => "add_index",
            OperationKind::AddUnique => "add_unique",
            OperationKind::AddForeignKey => "add_foreign_key",
            OperationKind::ValidateConstraint => "validate_constraint",
            OperationKind::DropConstraint => "drop_constraint",
            OperationKind::CreateView => "create_view",
            OperationKind::Backfill => "backfill",
            OperationKind::SetNotNull => "set_not_null",
            OperationKind::RenameColumn => "rename_column",
            OperationKind::RenameTable => "rename_table",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the three execution phases an operation prefers or has been assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NonTransactional,
    Transactional,
    Validation,
}

impl Phase {
    pub const ORDER: [Phase; 3] = [
        Phase::NonTransactional,
        Phase::Transactional,
        Phase::Validation,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).expect("phase in ORDER")
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NonTransactional => "non_transactional",
            Phase::Transactional => "transactional",
            Phase::Validation => "validation",
        };
        write!(f, "{s}")
    }
}

/// Kind-specific attributes. Not every field applies to every `OperationKind`;
/// unused fields stay `None`/default, mirroring the source's dynamic attribute
/// bag but with explicit, checked fields instead of an untyped map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub concurrently: Option<bool>,
    pub not_valid: Option<bool>,
    pub default_expr: Option<String>,
    pub default_is_volatile: Option<bool>,
    pub constraint_definition: Option<String>,
    pub column_type: Option<String>,
    pub is_partitioned_parent: Option<bool>,
    pub partition_children: Vec<String>,
    pub column_name: Option<String>,
    pub new_name: Option<String>,
    /// Set on the synthesized `ALTER INDEX ... ATTACH PARTITION` step emitted
    /// for each partition child of a partitioned-parent `add_index`.
    pub is_partition_attach: Option<bool>,
    pub attach_child_index: Option<String>,
}

/// Immutable description of a single schema change, as emitted by the external
/// SchemaDiffer. Operations are constructed once and never mutated; rewrites
/// and the planner produce new `Operation` values rather than editing in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub target: String,
    pub index_or_constraint_name: Option<String>,
    pub references: Vec<String>,
    pub attributes: Attributes,
    pub estimated_row_count: Option<u64>,
    pub phase_hint: Option<Phase>,
}

impl Operation {
    pub fn new(id: OperationId, kind: OperationKind, target: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            target: target.into(),
            index_or_constraint_name: None,
            references: Vec::new(),
            attributes: Attributes::default(),
            estimated_row_count: None,
            phase_hint: None,
        }
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_estimated_row_count(mut self, count: u64) -> Self {
        self.estimated_row_count = Some(count);
        self
    }

    pub fn with_phase_hint(mut self, phase: Phase) -> Self {
        self.phase_hint = Some(phase);
        self
    }

    /// `true` if the operation is a concurrent index build, the one kind the
    /// coordinator must serialize per-table (invariant 4 of spec §8).
    pub fn is_concurrent_index(&self) -> bool {
        self.kind == OperationKind::AddIndex && self.attributes.concurrently == Some(true)
    }
}

/// A classified operation carries its computed lock level alongside the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedOperation {
    pub operation: Operation,
    pub lock_level: LockLevel,
}
