//! MySQL-compatible scalar functions registered on SQLite connections.
//!
//! The query translator allows `INET_ATON`, `INET_NTOA` and `STR_TO_DATE`
//! in projections; SQLite has none of them natively.

use std::net::Ipv4Addr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Register the MySQL compatibility functions on `conn`.
pub fn register_mysql_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("INET_ATON", 1, flags, |ctx| {
        let addr: Option<String> = ctx.get(0)?;
        Ok(addr.as_deref().and_then(inet_aton))
    })?;

    conn.create_scalar_function("INET_NTOA", 1, flags, |ctx| {
        let n: Option<i64> = ctx.get(0)?;
        Ok(n.and_then(inet_ntoa))
    })?;

    conn.create_scalar_function("STR_TO_DATE", 2, flags, |ctx| {
        let value: Option<String> = ctx.get(0)?;
        let format: Option<String> = ctx.get(1)?;
        Ok(match (value, format) {
            (Some(v), Some(f)) => str_to_date(&v, &f),
            _ => None,
        })
    })?;

    Ok(())
}

/// Dotted-quad IPv4 address to its integer form.
pub fn inet_aton(addr: &str) -> Option<i64> {
    addr.trim()
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| i64::from(u32::from(ip)))
}

/// Integer to dotted-quad IPv4 address.
pub fn inet_ntoa(n: i64) -> Option<String> {
    u32::try_from(n).ok().map(|v| Ipv4Addr::from(v).to_string())
}

/// Parse `value` with a MySQL date format, rendering it the way MySQL
/// renders DATETIME, DATE or TIME values. Unparseable input yields `None`.
pub fn str_to_date(value: &str, mysql_format: &str) -> Option<String> {
    let format = translate_format(mysql_format);
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, &format) {
        return Some(dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, &format) {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    NaiveTime::parse_from_str(value, &format)
        .ok()
        .map(|t| t.format("%H:%M:%S").to_string())
}

/// Translate MySQL format specifiers into chrono's.
fn translate_format(mysql: &str) -> String {
    let mut out = String::with_capacity(mysql.len() + 8);
    let mut chars = mysql.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = match chars.next() {
            Some(spec) => spec,
            None => {
                out.push_str("%%");
                break;
            }
        };
        let mapped = match spec {
            'a' => "%a",
            'b' => "%b",
            'c' | 'm' => "%m",
            'd' => "%d",
            'e' => "%e",
            'f' => "%6f",
            'H' => "%H",
            'h' | 'I' => "%I",
            'i' => "%M",
            'j' => "%j",
            'k' => "%k",
            'l' => "%l",
            'M' => "%B",
            'p' => "%p",
            'r' => "%I:%M:%S %p",
            'S' | 's' => "%S",
            'T' => "%H:%M:%S",
            'W' => "%A",
            'w' => "%w",
            'Y' => "%Y",
            'y' => "%y",
            '%' => "%%",
            other => {
                out.push(other);
                continue;
            }
        };
        out.push_str(mapped);
    }
    out
}
