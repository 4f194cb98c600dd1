//! SQL identifier quoting and DDL text construction.
//!
//! Per spec §9 ("forbid interpolation of unvalidated identifiers"), every
//! piece of generated SQL routes identifiers through [`quote_ident`]. There is
//! no other path from an identifier string to a SQL statement in this crate.

/// Quote a PostgreSQL identifier, escaping embedded double quotes.
///
/// Callers must never hand-splice an identifier into a SQL string; route it
/// through this function first.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a qualified `schema.table` or a single identifier.
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// A single unit of rendered SQL plus the phase it must run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    pub text: String,
    /// `true` if this statement must not be wrapped in a transaction
    /// (e.g. `CREATE INDEX CONCURRENTLY`).
    pub non_transactional: bool,
}

impl SqlStatement {
    pub fn transactional(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            non_transactional: false,
        }
    }

    pub fn non_transactional(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            non_transactional: true,
        }
    }
}

pub fn create_index_concurrently(
    index_name: &str,
    table: &str,
    columns: &[String],
) -> SqlStatement {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    SqlStatement::non_transactional(format!(
        "CREATE INDEX CONCURRENTLY {} ON {} ({})",
        quote_ident(index_name),
        quote_qualified(table),
        cols
    ))
}

pub fn attach_partition_index(parent_index: &str, child_index: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER INDEX {} ATTACH PARTITION {}",
        quote_ident(parent_index),
        quote_ident(child_index)
    ))
}

pub fn add_foreign_key_not_valid(
    table: &str,
    constraint_name: &str,
    column: &str,
    ref_table: &str,
    ref_column: &str,
) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) NOT VALID",
        quote_qualified(table),
        quote_ident(constraint_name),
        quote_ident(column),
        quote_qualified(ref_table),
        quote_ident(ref_column)
    ))
}

pub fn validate_constraint(table: &str, constraint_name: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} VALIDATE CONSTRAINT {}",
        quote_qualified(table),
        quote_ident(constraint_name)
    ))
}

pub fn add_check_not_null_not_valid(table: &str, column: &str, check_name: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({} IS NOT NULL) NOT VALID",
        quote_qualified(table),
        quote_ident(check_name),
        quote_ident(column)
    ))
}

pub fn set_not_null(table: &str, column: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
        quote_qualified(table),
        quote_ident(column)
    ))
}

pub fn drop_constraint(table: &str, constraint_name: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_qualified(table),
        quote_ident(constraint_name)
    ))
}

pub fn add_column(table: &str, column: &str, column_type: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_qualified(table),
        quote_ident(column),
        column_type
    ))
}

pub fn set_column_default(table: &str, column: &str, default_expr: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
        quote_qualified(table),
        quote_ident(column),
        default_expr
    ))
}

pub fn backfill_batch(table: &str, set_clause: &str, where_clause: &str) -> SqlStatement {
    SqlStatement::transactional(format!(
        "UPDATE {} SET {} WHERE {}",
        quote_qualified(table),
        set_clause,
        where_clause
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident(r#"weird"name"#), "\"weird\"\"name\"");
    }

    #[test]
    fn quote_qualified_quotes_each_segment() {
        assert_eq!(quote_qualified("public.orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn create_index_concurrently_is_non_transactional() {
        let stmt = create_index_concurrently("idx_orders_user", "orders", &["user_id".into()]);
        assert!(stmt.non_transactional);
        assert!(stmt.text.contains("CONCURRENTLY"));
        assert!(stmt.text.contains("\"user_id\""));
    }
}
