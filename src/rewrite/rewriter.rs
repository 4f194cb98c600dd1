//! OperationRewriter: expands unsafe operations into safe multi-step
//! equivalents (spec §4.2).

use thiserror::Error;

use crate::operation::{Attributes, Operation, OperationId, OperationKind, Phase};

#[derive(Debug, Error, miette::Diagnostic)]
pub enum RewriteError {
    #[error("operation {0} cannot be rewritten: {1}")]
    #[diagnostic(code(wesley::rewrite::unsupported))]
    Unsupported(OperationId, &'static str),
}

/// Allocates fresh ids for operations synthesized during rewriting.
///
/// Grounded on the teacher's id-generation pattern (`utils::id_generator`):
/// a small monotonic counter seeded above the highest id already in the plan.
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn starting_after(existing: &[Operation]) -> Self {
        let next = existing.iter().map(|o| o.id.0).max().map(|m| m + 1).unwrap_or(0);
        Self { next }
    }

    pub fn next(&mut self) -> OperationId {
        let id = OperationId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OperationRewriter;

impl OperationRewriter {
    pub fn new() -> Self {
        Self
    }

    /// `rewrite(op) -> [Operation...]`. Emits operations equivalent in final
    /// state but using safer lock levels, per the table in spec §4.2.
    pub fn rewrite(&self, op: &Operation, ids: &mut IdAllocator) -> Result<Vec<Operation>, RewriteError> {
        match op.kind {
            OperationKind::AddIndex => Ok(self.rewrite_add_index(op, ids)),
            OperationKind::AddForeignKey => Ok(self.rewrite_add_foreign_key(op, ids)),
            OperationKind::AddUnique => Ok(self.rewrite_add_unique(op, ids)),
            OperationKind::SetNotNull => Ok(self.rewrite_set_not_null(op, ids)),
            OperationKind::AlterColumnType => Ok(self.rewrite_alter_column_type(op, ids)),
            OperationKind::AddColumn => Ok(self.rewrite_add_column(op, ids)),
            _ => Ok(vec![op.clone()]),
        }
    }

    fn rewrite_add_index(&self, op: &Operation, ids: &mut IdAllocator) -> Vec<Operation> {
        if op.attributes.is_partitioned_parent == Some(true) {
            // Parent index (ONLY) + per-partition concurrent builds + final
            // ATTACHes. The parent-only create stays transactional (it takes
            // no lock on partitions); the per-partition builds run
            // non-transactionally; each attach is cheap metadata-only DDL
            // that runs after its child index is built.
            let mut out = Vec::new();
            let parent_index_name = op.index_or_constraint_name.clone();
            let mut parent_only = op.clone();
            parent_only.phase_hint = Some(Phase::Transactional);
            out.push(parent_only);
            for child in &op.attributes.partition_children {
                let mut child_op = op.clone();
                child_op.id = ids.next();
                child_op.target = child.clone();
                child_op.attributes.concurrently = Some(true);
                child_op.attributes.is_partitioned_parent = Some(false);
                child_op.phase_hint = Some(Phase::NonTransactional);
                child_op.index_or_constraint_name =
                    parent_index_name.as_ref().map(|name| format!("{name}_{child}"));
                out.push(child_op.clone());

                let mut attach = Operation::new(ids.next(), OperationKind::AddIndex, op.target.clone());
                attach.index_or_constraint_name = parent_index_name.clone();
                attach.attributes.is_partition_attach = Some(true);
                attach.attributes.attach_child_index = child_op.index_or_constraint_name.clone();
                attach.references = vec![constraint_ref(&child_op)];
                attach.phase_hint = Some(Phase::Transactional);
                out.push(attach);
            }
            out
        } else {
            let mut rewritten = op.clone();
            rewritten.attributes.concurrently = Some(true);
            rewritten.phase_hint = Some(Phase::NonTransactional);
            vec![rewritten]
        }
    }

    fn rewrite_add_foreign_key(&self, op: &Operation, ids: &mut IdAllocator) -> Vec<Operation> {
        if op.attributes.is_partitioned_parent == Some(true) {
            // NOT VALID is unsupported on partitioned parents; annotate and
            // fall through to the validating (ACCESS EXCLUSIVE) form.
            let mut rewritten = op.clone();
            rewritten.attributes.not_valid = Some(false);
            rewritten.phase_hint = Some(Phase::Transactional);
            return vec![rewritten];
        }
        let mut not_valid = op.clone();
        not_valid.attributes.not_valid = Some(true);
        not_valid.phase_hint = Some(Phase::Transactional);

        let mut validate = Operation::new(ids.next(), OperationKind::ValidateConstraint, op.target.clone());
        validate.index_or_constraint_name = op.index_or_constraint_name.clone();
        validate.references = vec![constraint_ref(&not_valid)];
        validate.phase_hint = Some(Phase::Validation);

        vec![not_valid, validate]
    }

    fn rewrite_add_unique(&self, op: &Operation, _ids: &mut IdAllocator) -> Vec<Operation> {
        // Concurrent unique index, then attach as a constraint "USING INDEX" —
        // modeled here as a single synthesized AddIndex (non-transactional)
        // followed by the original op reinterpreted as a cheap attach in the
        // transactional phase.
        let mut index_build = op.clone();
        index_build.kind = OperationKind::AddIndex;
        index_build.attributes.concurrently = Some(true);
        index_build.phase_hint = Some(Phase::NonTransactional);

        let mut attach = op.clone();
        attach.phase_hint = Some(Phase::Transactional);
        attach.references = vec![constraint_ref(&index_build)];

        vec![index_build, attach]
    }

    fn rewrite_set_not_null(&self, op: &Operation, ids: &mut IdAllocator) -> Vec<Operation> {
        let column = op
            .attributes
            .column_name
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string());
        let check_name = format!("{}_{}_not_null_check", op.target, column);

        // The three-step rewrite stays within the closed `OperationKind` set:
        // the NOT VALID check-add and the final SET NOT NULL are both
        // `SetNotNull` operations, distinguished by whether
        // `constraint_definition` is populated.
        let mut add_check = Operation::new(ids.next(), OperationKind::SetNotNull, op.target.clone());
        add_check.attributes.constraint_definition = Some(format!("CHECK ({column} IS NOT NULL) NOT VALID"));
        add_check.index_or_constraint_name = Some(check_name.clone());
        add_check.phase_hint = Some(Phase::Transactional);

        let mut validate = Operation::new(ids.next(), OperationKind::ValidateConstraint, op.target.clone());
        validate.index_or_constraint_name = Some(check_name.clone());
        validate.references = vec![format!("constraint:{check_name}")];
        validate.phase_hint = Some(Phase::Validation);

        let mut set_not_null = op.clone();
        set_not_null.attributes.constraint_definition = None;
        set_not_null.references = vec![format!("constraint:{check_name}")];
        set_not_null.phase_hint = Some(Phase::Transactional);

        vec![add_check, validate, set_not_null]
    }

    fn rewrite_alter_column_type(&self, op: &Operation, ids: &mut IdAllocator) -> Vec<Operation> {
        // Shadow-column strategy: add new column, backfill, swap.
        let column = op
            .attributes
            .column_name
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string());
        let shadow_column = format!("{column}_wesley_shadow");

        let mut add_shadow = Operation::new(ids.next(), OperationKind::AddColumn, op.target.clone());
        add_shadow.attributes.column_name = Some(shadow_column.clone());
        add_shadow.attributes.column_type = op.attributes.column_type.clone();
        add_shadow.phase_hint = Some(Phase::Transactional);

        let mut backfill = Operation::new(ids.next(), OperationKind::Backfill, op.target.clone());
        backfill.attributes.column_name = Some(shadow_column.clone());
        backfill.references = vec![format!("column:{shadow_column}")];
        backfill.phase_hint = Some(Phase::NonTransactional);
        backfill.estimated_row_count = op.estimated_row_count;

        let mut swap = op.clone();
        swap.attributes.column_name = Some(shadow_column);
        swap.references = vec![format!("backfill:{}", backfill.id.0)];
        swap.phase_hint = Some(Phase::Transactional);

        vec![add_shadow, backfill, swap]
    }

    fn rewrite_add_column(&self, op: &Operation, ids: &mut IdAllocator) -> Vec<Operation> {
        if op.attributes.default_is_volatile != Some(true) {
            return vec![op.clone()];
        }
        let column = op
            .attributes
            .column_name
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string());

        let mut add_bare = op.clone();
        add_bare.attributes.default_expr = None;
        add_bare.attributes.default_is_volatile = None;
        add_bare.phase_hint = Some(Phase::Transactional);

        let mut set_default = Operation::new(ids.next(), OperationKind::AddColumn, op.target.clone());
        set_default.attributes.column_name = Some(column.clone());
        set_default.attributes.default_expr = op.attributes.default_expr.clone();
        set_default.references = vec![format!("column:{column}")];
        set_default.phase_hint = Some(Phase::Transactional);

        let mut backfill = Operation::new(ids.next(), OperationKind::Backfill, op.target.clone());
        backfill.attributes.column_name = Some(column);
        backfill.references = vec![format!("op:{}", set_default.id.0)];
        backfill.phase_hint = Some(Phase::NonTransactional);
        backfill.estimated_row_count = op.estimated_row_count;

        vec![add_bare, set_default, backfill]
    }
}

fn constraint_ref(op: &Operation) -> String {
    match &op.index_or_constraint_name {
        Some(name) => format!("constraint:{name}"),
        None => format!("op:{}", op.id.0),
    }
}
