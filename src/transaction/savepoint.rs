//! Save-point names and statements.
//!
//! Nested transactions are emulated with save points named after their
//! nesting depth: the first nested level is `transaction1`, the second
//! `transaction2`, and so on. Names depend only on depth, so two levels of
//! one handle can never collide, and the statement that consumes a level
//! always names the point that opened it. The flip side is that one handle
//! must never be driven from two call chains at once.

use crate::db::Dialect;

/// Literal prefix of automatic save-point names.
pub const SAVEPOINT_PREFIX: &str = "transaction";

/// Quoted name of the save point opened at nesting `depth` (1-based).
pub(crate) fn nested_name(dialect: Dialect, depth: usize) -> String {
    dialect.quote_identifier(&format!("{SAVEPOINT_PREFIX}{depth}"))
}

pub(crate) fn create(quoted: &str) -> String {
    format!("SAVEPOINT {quoted}")
}

pub(crate) fn release(quoted: &str) -> String {
    format!("RELEASE SAVEPOINT {quoted}")
}

pub(crate) fn rollback_to(quoted: &str) -> String {
    format!("ROLLBACK TO SAVEPOINT {quoted}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_follow_depth() {
        assert_eq!(nested_name(Dialect::Generic, 1), "transaction1");
        assert_ne!(nested_name(Dialect::Generic, 1), nested_name(Dialect::Generic, 2));
        assert_eq!(nested_name(Dialect::MySql, 3), "`transaction3`");
    }

    #[test]
    fn test_statements() {
        let name = nested_name(Dialect::Postgres, 1);
        assert_eq!(create(&name), "SAVEPOINT \"transaction1\"");
        assert_eq!(release(&name), "RELEASE SAVEPOINT \"transaction1\"");
        assert_eq!(rollback_to(&name), "ROLLBACK TO SAVEPOINT \"transaction1\"");
    }
}
