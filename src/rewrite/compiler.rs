//! Compiles one (possibly already-rewritten) `Operation` into the exact
//! `SqlStatement` the channel sends to Postgres. This is the last step before
//! dispatch: `OperationRewriter` decides *what* operations to run and in what
//! phase; `compile` decides the literal SQL text for one of them.

use crate::operation::{Operation, OperationKind};
use crate::rewrite::rewriter::RewriteError;
use crate::rewrite::sql::{self, SqlStatement};

pub fn compile(op: &Operation) -> Result<SqlStatement, RewriteError> {
    match op.kind {
        OperationKind::CreateTable => body_statement(op, "CREATE TABLE"),
        OperationKind::CreateView => body_statement(op, "CREATE VIEW"),
        OperationKind::DropTable => Ok(SqlStatement::transactional(format!(
            "DROP TABLE {}",
            sql::quote_qualified(&op.target)
        ))),
        OperationKind::AddColumn => {
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            let column_type = require_attr(op, op.attributes.column_type.as_deref(), "column_type")?;
            match &op.attributes.default_expr {
                Some(default_expr) if op.attributes.default_is_volatile.is_none() => {
                    Ok(sql::set_column_default(&op.target, column, default_expr))
                }
                _ => Ok(sql::add_column(&op.target, column, column_type)),
            }
        }
        OperationKind::DropColumn => {
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            Ok(SqlStatement::transactional(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                sql::quote_qualified(&op.target),
                sql::quote_ident(column)
            )))
        }
        OperationKind::AlterColumnType => {
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            let column_type = require_attr(op, op.attributes.column_type.as_deref(), "column_type")?;
            Ok(SqlStatement::transactional(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                sql::quote_qualified(&op.target),
                sql::quote_ident(column),
                column_type,
                sql::quote_ident(column),
                column_type
            )))
        }
        OperationKind::AddIndex if op.attributes.is_partition_attach == Some(true) => {
            let parent_index = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            let child_index = require_attr(op, op.attributes.attach_child_index.as_deref(), "attach_child_index")?;
            Ok(sql::attach_partition_index(parent_index, child_index))
        }
        OperationKind::AddIndex => {
            let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            let columns = index_columns(op)?;
            if op.attributes.concurrently == Some(true) {
                Ok(sql::create_index_concurrently(name, &op.target, &columns))
            } else {
                let cols = columns.iter().map(|c| sql::quote_ident(c)).collect::<Vec<_>>().join(", ");
                Ok(SqlStatement::transactional(format!(
                    "CREATE INDEX {} ON {} ({})",
                    sql::quote_ident(name),
                    sql::quote_qualified(&op.target),
                    cols
                )))
            }
        }
        OperationKind::AddUnique => {
            let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            Ok(SqlStatement::transactional(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE USING INDEX {}",
                sql::quote_qualified(&op.target),
                sql::quote_ident(name),
                sql::quote_ident(name)
            )))
        }
        OperationKind::AddForeignKey => {
            let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            let (ref_table, ref_column) = parse_foreign_key_target(op)?;
            if op.attributes.not_valid == Some(true) {
                Ok(sql::add_foreign_key_not_valid(&op.target, name, column, &ref_table, &ref_column))
            } else {
                Ok(SqlStatement::transactional(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    sql::quote_qualified(&op.target),
                    sql::quote_ident(name),
                    sql::quote_ident(column),
                    sql::quote_qualified(&ref_table),
                    sql::quote_ident(&ref_column)
                )))
            }
        }
        OperationKind::ValidateConstraint => {
            let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            Ok(sql::validate_constraint(&op.target, name))
        }
        OperationKind::DropConstraint => {
            let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
            Ok(sql::drop_constraint(&op.target, name))
        }
        OperationKind::SetNotNull => match &op.attributes.constraint_definition {
            Some(definition) => {
                let name = require_attr(op, op.index_or_constraint_name.as_deref(), "index_or_constraint_name")?;
                Ok(SqlStatement::transactional(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} {definition}",
                    sql::quote_qualified(&op.target),
                    sql::quote_ident(name),
                )))
            }
            None => {
                let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
                Ok(sql::set_not_null(&op.target, column))
            }
        },
        OperationKind::Backfill => {
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            let value = op.attributes.default_expr.as_deref().unwrap_or("NULL");
            let set_clause = format!("{} = {value}", sql::quote_ident(column));
            Ok(sql::backfill_batch(&op.target, &set_clause, &format!("{} IS NULL", sql::quote_ident(column))))
        }
        OperationKind::RenameColumn => {
            let column = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
            let new_name = require_attr(op, op.attributes.new_name.as_deref(), "new_name")?;
            Ok(SqlStatement::transactional(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                sql::quote_qualified(&op.target),
                sql::quote_ident(column),
                sql::quote_ident(new_name)
            )))
        }
        OperationKind::RenameTable => {
            let new_name = require_attr(op, op.attributes.new_name.as_deref(), "new_name")?;
            Ok(SqlStatement::transactional(format!(
                "ALTER TABLE {} RENAME TO {}",
                sql::quote_qualified(&op.target),
                sql::quote_ident(new_name)
            )))
        }
    }
}

fn require_attr<'a>(
    op: &Operation,
    value: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, RewriteError> {
    value.ok_or(RewriteError::Unsupported(op.id, name))
}

fn body_statement(op: &Operation, verb: &'static str) -> Result<SqlStatement, RewriteError> {
    let body = require_attr(op, op.attributes.constraint_definition.as_deref(), "constraint_definition")?;
    Ok(SqlStatement::transactional(format!(
        "{verb} {} {body}",
        sql::quote_qualified(&op.target),
    )))
}

fn index_columns(op: &Operation) -> Result<Vec<String>, RewriteError> {
    let raw = require_attr(op, op.attributes.column_name.as_deref(), "column_name")?;
    Ok(raw.split(',').map(|c| c.trim().to_string()).collect())
}

/// Reads `"schema.table.column"` or `"table.column"` out of
/// `constraint_definition`, the only place a foreign key's target is carried.
fn parse_foreign_key_target(op: &Operation) -> Result<(String, String), RewriteError> {
    let raw = require_attr(op, op.attributes.constraint_definition.as_deref(), "constraint_definition")?;
    match raw.rsplit_once('.') {
        Some((table, column)) => Ok((table.to_string(), column.to_string())),
        None => Err(RewriteError::Unsupported(op.id, "constraint_definition")),
    }
}
