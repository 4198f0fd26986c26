//! Render SQL with its arguments inlined, for logs only.

use serde_json::Value;

/// Replace each `?` placeholder outside string literals with the matching
/// argument rendered as a SQL literal.
///
/// Placeholders without an argument are left in place; surplus arguments
/// are ignored. The output is for humans and is never executed.
pub fn format_sql(sql: &str, args: &[Value]) -> String {
    if args.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut args = args.iter();
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match (c, quote) {
            ('\'' | '"' | '`', None) => {
                quote = Some(c);
                out.push(c);
            }
            (c, Some(q)) if c == q => {
                quote = None;
                out.push(c);
            }
            ('?', None) => match args.next() {
                Some(arg) => out.push_str(&literal(arg)),
                None => out.push('?'),
            },
            _ => out.push(c),
        }
    }
    out
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
