//! SQL dialects.
//!
//! The transaction core emits only save-point statements of its own, so the
//! dialect matters for one thing: how identifiers are quoted.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Ident;

/// SQL dialect of the database behind a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Identifiers are emitted unquoted.
    #[default]
    Generic,
    /// Backtick quoting.
    MySql,
    /// Double-quote quoting.
    Postgres,
    /// Double-quote quoting.
    Sqlite,
    /// Bracket quoting.
    MsSql,
}

impl Dialect {
    /// Opening quote character, if identifiers are quoted at all.
    pub fn quote_char(&self) -> Option<char> {
        match self {
            Dialect::Generic => None,
            Dialect::MySql => Some('`'),
            Dialect::Postgres | Dialect::Sqlite => Some('"'),
            Dialect::MsSql => Some('['),
        }
    }

    /// Quote `name` as an identifier, escaping embedded quote characters.
    pub fn quote_identifier(&self, name: &str) -> String {
        let ident = match self.quote_char() {
            Some(quote) => Ident::with_quote(quote, name),
            None => Ident::new(name),
        };
        ident.to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Generic => write!(f, "generic"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::MsSql => write!(f, "mssql"),
        }
    }
}

/// Parse a dialect from its name or a common alias.
impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" | "" => Ok(Dialect::Generic),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mssql" | "sqlserver" => Ok(Dialect::MsSql),
            _ => Err(format!("unknown dialect: {}", s)),
        }
    }
}
