//! Text-protocol SQL formatting.
//!
//! The raw-row path bypasses prepared statements: `?` placeholders are
//! expanded into escaped literals before the query is sent over the text
//! protocol. Placeholders inside quoted strings, quoted identifiers or
//! after a backslash are left untouched.

use relay_core::param::SqlParam;
use relay_core::value::{Blob, TimeValue};

/// Count the bindable `?` placeholders in a statement.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan(sql, |_| {}, |_| count += 1);
    count
}

/// Expand `?` placeholders into escaped literals, in order. Placeholders
/// beyond the supplied parameters are kept verbatim.
pub fn format_query(sql: &str, params: &[SqlParam]) -> String {
    let mut out = String::with_capacity(sql.len() + params.len() * 16);
    let mut next = 0;
    scan(
        sql,
        |ch| out.push(ch),
        |out: &mut String| {
            if next < params.len() {
                out.push_str(&format_literal(&params[next]));
                next += 1;
            } else {
                out.push('?');
            }
        },
    );
    out
}

/// Walk the statement, feeding ordinary characters to `emit` and bindable
/// placeholders to `placeholder`.
fn scan<E, P>(sql: &str, mut emit: E, mut placeholder: P)
where
    E: FnMut(char),
    P: FnMut(&mut String),
{
    // Both callers route through a scratch string so the two closures can
    // share one signature.
    let mut scratch = String::new();
    let mut chars = sql.chars().peekable();
    let mut prev = '\0';

    while let Some(ch) = chars.next() {
        match ch {
            '?' if prev != '\\' => {
                placeholder(&mut scratch);
                for c in scratch.drain(..) {
                    emit(c);
                }
            }
            '\'' | '"' | '`' => {
                emit(ch);
                // Copy the quoted run verbatim, honouring doubled quotes.
                while let Some(inner) = chars.next() {
                    emit(inner);
                    if inner == ch {
                        if chars.peek() == Some(&ch) {
                            emit(chars.next().unwrap());
                        } else {
                            break;
                        }
                    }
                }
            }
            _ => emit(ch),
        }
        prev = ch;
    }
}

/// Render one parameter as a SQL literal.
fn format_literal(param: &SqlParam) -> String {
    match param {
        SqlParam::Null => "NULL".to_string(),
        SqlParam::TinyInt(v) => v.to_string(),
        SqlParam::TinyUint(v) => v.to_string(),
        SqlParam::SmallInt(v) => v.to_string(),
        SqlParam::SmallUint(v) => v.to_string(),
        SqlParam::Int(v) => v.to_string(),
        SqlParam::Uint(v) => v.to_string(),
        SqlParam::BigInt(v) => v.to_string(),
        SqlParam::BigUint(v) => v.to_string(),
        SqlParam::Float(v) => v.to_string(),
        SqlParam::Double(v) => v.to_string(),
        SqlParam::Text(v) => quote_str(v),
        SqlParam::Bytes(v) => hex_literal(v),
        SqlParam::Time(v) => quote_time(v),
    }
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

fn quote_time(t: &TimeValue) -> String {
    format!("'{t}'")
}

fn hex_literal(b: &Blob) -> String {
    let mut out = String::with_capacity(b.len() * 2 + 3);
    out.push_str("X'");
    for byte in b.as_bytes() {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::params;

    #[test]
    fn placeholders_are_counted_outside_quotes() {
        assert_eq!(count_placeholders("select ?"), 1);
        assert_eq!(count_placeholders("select ?, ?"), 2);
        assert_eq!(count_placeholders("select '?' , ?"), 1);
        assert_eq!(count_placeholders("select \"?\" , `a?b`"), 0);
        assert_eq!(count_placeholders(r"select \? , ?"), 1);
    }

    #[test]
    fn literals_are_quoted_per_type() {
        let sql = format_query(
            "insert into t values (?, ?, ?, ?)",
            &params![1i32, "it's", 2.5f64, Blob::from(&[0xABu8, 0x01][..])],
        );
        assert_eq!(
            sql,
            "insert into t values (1, 'it''s', 2.5, X'AB01')"
        );
    }

    #[test]
    fn time_binds_as_quoted_datetime() {
        let mut t = TimeValue::new();
        t.set_year(2024).set_month(9).set_day(10);
        let sql = format_query("insert into t values (?)", &params![t]);
        assert_eq!(sql, "insert into t values ('2024-09-10 00:00:00')");
    }

    #[test]
    fn placeholders_inside_strings_survive() {
        let sql = format_query("select * from t where a = '?' and b = ?", &params![7i32]);
        assert_eq!(sql, "select * from t where a = '?' and b = 7");
    }

    #[test]
    fn excess_placeholders_are_kept() {
        let sql = format_query("select ?, ?", &params![1i32]);
        assert_eq!(sql, "select 1, ?");
    }

    #[test]
    fn null_renders_bare() {
        let sql = format_query("select ?", &[SqlParam::Null]);
        assert_eq!(sql, "select NULL");
    }
}
