//! SQL generation against a cached view.
//!
//! User fragments are split, identifiers containing `.` are backtick-quoted,
//! function calls are checked against an allow-list, and an owner predicate
//! is always conjoined. The assembled text is screened once more against a
//! reserved-pattern blacklist.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use recall_core::{
    fixed_column_list, is_plain_identifier, ConfigError, Projection, RecallError, RecallResult,
    SecurityError, ValidationError,
};
use regex::Regex;

/// Functions that may appear in projections.
pub const ALLOWED_FUNCTIONS: [&str; 10] = [
    "COUNT",
    "SUM",
    "MIN",
    "MAX",
    "LOWER",
    "UPPER",
    "INET_ATON",
    "INET_NTOA",
    "CONVERT",
    "STR_TO_DATE",
];

/// Order injected when a query has none, for stable pagination.
pub const DEFAULT_ORDER_BY: &str = " ORDER BY _eventId_";

const RESERVED_PATTERNS: [&str; 8] = [
    r"[^\\];",
    r"CREATE\s+TABLE",
    r"DROP\s+TABLE",
    r"ALTER\s+TABLE",
    r"DROP\s+DATABASE",
    r"CREATE\s+PROCEDURE",
    r"DELETE\s",
    r"INSERT\s",
];

static RESERVED: Lazy<Result<Vec<(&'static str, Regex)>, regex::Error>> = Lazy::new(|| {
    RESERVED_PATTERNS
        .iter()
        .map(|p| Regex::new(&format!("(?s){}", p)).map(|re| (*p, re)))
        .collect()
});

/// Patterns rejected only outside quoted literals.
const RESERVED_OUTSIDE_LITERALS: [&str; 3] = [r"\bUNION\b", r"--", r"/\*"];

static RESERVED_UNQUOTED: Lazy<Result<Vec<(&'static str, Regex)>, regex::Error>> =
    Lazy::new(|| {
        RESERVED_OUTSIDE_LITERALS
            .iter()
            .map(|p| Regex::new(p).map(|re| (*p, re)))
            .collect()
    });

static FUNCTION_CALL: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\("));

fn pattern_error(e: &regex::Error) -> RecallError {
    RecallError::Config(ConfigError::InvalidValue {
        field: "reserved_patterns".to_string(),
        value: String::new(),
        reason: e.to_string(),
    })
}

// ============================================================================
// TOKENIZING
// ============================================================================

/// Split `input` on `delim` wherever it is outside parentheses and quotes.
///
/// Tokens are trimmed; empty tokens are dropped.
pub fn tokenize_outside_parens(input: &str, delim: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut current = String::new();

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if c == delim && depth == 0 => {
                    push_token(&mut tokens, &current);
                    current.clear();
                    continue;
                }
                _ => {}
            },
        }
        current.push(c);
    }
    push_token(&mut tokens, &current);
    tokens
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        tokens.push(trimmed.to_string());
    }
}

/// Blank out quoted literals so their contents never read as calls.
fn strip_literals(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut quote: Option<char> = None;
    for c in token.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None => out.push(c),
        }
    }
    out
}

/// Require every `)` to close an earlier `(`, ignoring quoted literals.
fn check_balanced(fragment: &str) -> RecallResult<()> {
    let mut depth: i64 = 0;
    for c in strip_literals(fragment).chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        return Err(SecurityError::UnsafeSql {
            pattern: "unbalanced parentheses".to_string(),
        }
        .into());
    }
    Ok(())
}

fn strip_backticks(token: &str) -> String {
    token.replace('`', "").trim().to_string()
}

// ============================================================================
// TRANSLATOR
// ============================================================================

/// Translates projections into SQL over one cached view.
#[derive(Debug, Clone, Default)]
pub struct SqlTranslator {
    /// Non-fixed columns of the view; function arguments naming one get quoted.
    view_columns: HashSet<String>,
    /// Queryable fields; condition tokens naming one get quoted.
    variable_fields: HashSet<String>,
}

impl SqlTranslator {
    pub fn new<I, J>(view_columns: I, variable_fields: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            view_columns: view_columns.into_iter().collect(),
            variable_fields: variable_fields.into_iter().collect(),
        }
    }

    /// Check whether a token is a function call.
    ///
    /// A token is a call when it has a `(` after its first character and a
    /// `)`, ignoring quoted literals. Every function it calls must be on the
    /// allow-list (case-insensitive), otherwise the token is rejected.
    pub fn is_function(token: &str) -> RecallResult<bool> {
        let bare = strip_literals(token);
        let has_call_shape = matches!(bare.find('('), Some(idx) if idx > 0) && bare.contains(')');
        if !has_call_shape {
            return Ok(false);
        }

        let call = FUNCTION_CALL.as_ref().map_err(pattern_error)?;
        let mut calls = call.captures_iter(&bare).peekable();
        if calls.peek().is_none() {
            return Err(SecurityError::DisallowedFunction {
                token: token.to_string(),
            }
            .into());
        }
        for captures in calls {
            let name = captures.get(1).map_or("", |m| m.as_str()).to_uppercase();
            if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                return Err(SecurityError::DisallowedFunction {
                    token: token.to_string(),
                }
                .into());
            }
        }
        Ok(true)
    }

    /// Backtick-quote an identifier that contains `.`.
    ///
    /// Function calls are left as written except that arguments naming a
    /// view column are quoted in place.
    pub fn quote_field(&self, field: &str) -> RecallResult<String> {
        if field == "*" || !field.contains('.') {
            return Ok(field.to_string());
        }
        if !Self::is_function(field)? {
            return Ok(format!("`{}`", field));
        }
        if field.contains("(*)") {
            return Ok(field.to_string());
        }

        let start = field.rfind('(').map_or(0, |i| i + 1);
        let end = match field.find(')') {
            Some(end) if end >= start => end,
            _ => return Ok(field.to_string()),
        };
        let mut quoted = field.to_string();
        for arg in field[start..end].split(',') {
            if arg.contains('\'') || arg.contains('"') {
                continue;
            }
            if self.view_columns.contains(arg) {
                quoted = quoted.replace(arg, &format!("`{}`", arg));
            }
        }
        Ok(quoted)
    }

    /// Quote each item of an ORDER BY list, keeping direction suffixes.
    pub fn build_order_clause(&self, order: Option<&str>) -> RecallResult<Option<String>> {
        let order = match order {
            Some(order) => order,
            None => return Ok(None),
        };
        let mut items = Vec::new();
        for item in tokenize_outside_parens(order, ',') {
            let mut parts = Vec::new();
            for part in tokenize_outside_parens(&item, ' ') {
                parts.push(self.quote_field(&strip_backticks(&part))?);
            }
            items.push(parts.join(" "));
        }
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.join(","))
        })
    }

    fn build_fields(&self, fields: Option<&str>) -> RecallResult<String> {
        let fields = match fields {
            Some(f) if f.trim() != "*" => f,
            _ => return Ok("*".to_string()),
        };

        let mut requested: Vec<String> = Vec::new();
        for token in tokenize_outside_parens(fields, ',') {
            let token = strip_backticks(&token);
            Self::is_function(&token)?;
            let quoted = self.quote_field(&token)?;
            if !requested.contains(&quoted) {
                requested.push(quoted);
            }
        }

        let mut out: Vec<String> = Vec::with_capacity(requested.len() + 1);
        if requested.iter().any(|f| f == "*") {
            out.push("*".to_string());
            out.extend(requested.into_iter().filter(|f| f != "*"));
        } else {
            out.push(fixed_column_list());
            out.extend(requested);
        }
        Ok(out.join(","))
    }

    fn build_conditions(&self, conditions: Option<&str>) -> RecallResult<Option<String>> {
        let conditions = match conditions {
            Some(c) => c,
            None => return Ok(None),
        };
        // The fragment is wrapped in the owner-scoped group and must not close it.
        check_balanced(conditions)?;
        let mut rebuilt = String::new();
        for token in conditions.split(' ') {
            let field = strip_backticks(token);
            if self.variable_fields.contains(&field) || Self::is_function(&field)? {
                rebuilt.push_str(&self.quote_field(&field)?);
            } else {
                rebuilt.push_str(token);
            }
            rebuilt.push(' ');
        }
        let rebuilt = rebuilt.trim();
        Ok(if rebuilt.is_empty() {
            None
        } else {
            Some(rebuilt.to_string())
        })
    }

    fn build_grouping(&self, grouping: Option<&str>) -> RecallResult<Option<String>> {
        let grouping = match grouping {
            Some(g) => g,
            None => return Ok(None),
        };
        let mut groups = Vec::new();
        for token in grouping.split(',') {
            let token = strip_backticks(token);
            if token.is_empty() {
                continue;
            }
            groups.push(self.quote_field(&token)?);
        }
        Ok(if groups.is_empty() {
            None
        } else {
            Some(groups.join(","))
        })
    }

    /// Assemble the SELECT for `view`, restricted to rows owned by `owner`.
    pub fn generate_sql(
        &self,
        view: &str,
        projection: &Projection,
        owner: &str,
    ) -> RecallResult<String> {
        if !is_plain_identifier(view) {
            return Err(ValidationError::InvalidIdentifier {
                kind: "view".to_string(),
                value: view.to_string(),
            }
            .into());
        }
        let projection = projection.normalized();

        let fields = self.build_fields(projection.fields.as_deref())?;
        let conditions = self.build_conditions(projection.conditions.as_deref())?;
        let order = self.build_order_clause(projection.order.as_deref())?;
        let grouping = self.build_grouping(projection.grouping.as_deref())?;

        let owner_predicate = format!("_user_ = '{}'", owner.replace('\'', "''"));
        let conditions = match conditions {
            Some(c) => format!("{} AND ({})", owner_predicate, c),
            None => owner_predicate,
        };

        let mut sql = format!("SELECT {} FROM {} WHERE {}", fields, view, conditions);
        if let Some(grouping) = grouping {
            sql.push_str(" GROUP BY ");
            sql.push_str(&grouping);
        }
        if let Some(order) = order {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        tracing::trace!(sql = %sql, "generated query");
        check_sql_safe(&sql)?;
        Ok(sql)
    }
}

/// Reject text matching a reserved pattern, compared upper-cased.
pub fn check_sql_safe(sql: &str) -> RecallResult<()> {
    let upper = sql.to_uppercase();
    let reserved = RESERVED.as_ref().map_err(pattern_error)?;
    let unquoted = strip_literals(&upper);
    let reserved_unquoted = RESERVED_UNQUOTED.as_ref().map_err(pattern_error)?;
    let hit = reserved
        .iter()
        .find(|(_, re)| re.is_match(&upper))
        .or_else(|| reserved_unquoted.iter().find(|(_, re)| re.is_match(&unquoted)));
    match hit {
        Some((pattern, _)) => Err(SecurityError::UnsafeSql {
            pattern: pattern.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Append the default order when `sql` has no ORDER BY of its own.
pub fn with_default_order(sql: &str) -> String {
    if sql.to_uppercase().contains(" ORDER BY ") {
        sql.to_string()
    } else {
        format!("{}{}", sql, DEFAULT_ORDER_BY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed() -> String {
        fixed_column_list()
    }

    fn translator() -> SqlTranslator {
        let columns = ["foo.bar", "hey.there", "hi.there", "ho.there", "test1", "UPTIME.0"];
        SqlTranslator::new(
            columns.iter().map(|c| c.to_string()),
            vec!["foo.bar".to_string()],
        )
    }

    fn sql(t: &SqlTranslator, p: Projection) -> String {
        t.generate_sql("v", &p, "me").expect("sql should generate")
    }

    #[test]
    fn test_all_columns_for_missing_fields() {
        let t = translator();
        let want = "SELECT * FROM v WHERE _user_ = 'me'";
        assert_eq!(sql(&t, Projection::new()), want);
        assert_eq!(sql(&t, Projection::new().with_fields("")), want);
        assert_eq!(sql(&t, Projection::new().with_fields("*")), want);
    }

    #[test]
    fn test_dotted_column_quoted() {
        let t = translator();
        let want = format!("SELECT {},`foo.bar` FROM v WHERE _user_ = 'me'", fixed());
        assert_eq!(sql(&t, Projection::new().with_fields("foo.bar")), want);
        assert_eq!(sql(&t, Projection::new().with_fields("`foo.bar`")), want);
    }

    #[test]
    fn test_where_clause_quotes_variable_fields() {
        let t = translator();
        let want = format!(
            "SELECT {},`foo.bar` FROM v WHERE _user_ = 'me' AND (`foo.bar` = 'ABC')",
            fixed()
        );
        for cond in ["foo.bar = 'ABC'", "`foo.bar` = 'ABC'"] {
            let p = Projection::new().with_fields("foo.bar").with_conditions(cond);
            assert_eq!(sql(&t, p), want);
        }
    }

    #[test]
    fn test_order_and_group_quoted() {
        let t = translator();
        let p = Projection::new().with_fields("foo.bar").with_order("`foo.bar` DESC");
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT {},`foo.bar` FROM v WHERE _user_ = 'me' ORDER BY `foo.bar` DESC",
                fixed()
            )
        );
        let p = Projection::new().with_fields("foo.bar").with_grouping("`foo.bar`");
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT {},`foo.bar` FROM v WHERE _user_ = 'me' GROUP BY `foo.bar`",
                fixed()
            )
        );
    }

    #[test]
    fn test_functions_quote_their_arguments() {
        let t = translator();
        let p = Projection::new()
            .with_fields("foo.bar, MIN(foo.bar), COUNT(foo.bar)")
            .with_conditions("COUNT(foo.bar) > 1")
            .with_grouping("MIN(foo.bar)")
            .with_order("COUNT(foo.bar)");
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT {},`foo.bar`,MIN(`foo.bar`),COUNT(`foo.bar`) FROM v WHERE _user_ = 'me' \
                 AND (COUNT(`foo.bar`) > 1) GROUP BY MIN(`foo.bar`) ORDER BY COUNT(`foo.bar`)",
                fixed()
            )
        );
    }

    #[test]
    fn test_star_with_aggregates() {
        let t = translator();
        let p = Projection::new()
            .with_fields("*, COUNT(*)")
            .with_conditions("COUNT(*) > 1")
            .with_grouping("MIN(*)")
            .with_order("COUNT(*)");
        assert_eq!(
            sql(&t, p),
            "SELECT *,COUNT(*) FROM v WHERE _user_ = 'me' AND (COUNT(*) > 1) GROUP BY MIN(*) ORDER BY COUNT(*)"
        );
    }

    #[test]
    fn test_aggregate_alias() {
        let t = translator();
        let p = Projection::new()
            .with_fields("COUNT(foo.bar) as temp")
            .with_grouping("temp")
            .with_order("temp ASC");
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT {},COUNT(`foo.bar`) as temp FROM v WHERE _user_ = 'me' GROUP BY temp ORDER BY temp ASC",
                fixed()
            )
        );
    }

    #[test]
    fn test_nested_conditions_keep_spacing() {
        let t = SqlTranslator::new(
            Vec::new(),
            ["foo.bar", "FIELD1.10.1.0", "FIELD2.30.5.1", "FIELD3.20.5.1"]
                .iter()
                .map(|s| s.to_string()),
        );
        let p = Projection::new().with_fields("foo.bar").with_conditions(
            "((( FIELD1.10.1.0 = 'value.1' ) or ( FIELD2.30.5.1 = 'george' )) and  FIELD3.20.5.1 = 'someday' )",
        );
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT {},`foo.bar` FROM v WHERE _user_ = 'me' AND (((( `FIELD1.10.1.0` = 'value.1' ) \
                 or ( `FIELD2.30.5.1` = 'george' )) and  `FIELD3.20.5.1` = 'someday' ))",
                fixed()
            )
        );
    }

    #[test]
    fn test_date_function_in_conditions_and_order() {
        let t = translator();
        let order = "STR_TO_DATE(`UPTIME.0`, '%a %b %e %H:%i:%s GMT %Y')";
        let conditions = "STR_TO_DATE(`UPTIME.0`, '%a %b %e %H:%i:%s GMT %Y') BETWEEN \
             STR_TO_DATE('Tue Apr 8 10:30:57 GMT 2014', '%a %b %e %H:%i:%s GMT %Y') AND \
             STR_TO_DATE('Wed Apr 9 10:30:57 GMT 2014', '%a %b %e %H:%i:%s GMT %Y')";
        let p = Projection::new()
            .with_conditions(conditions)
            .with_order(format!("{} DESC,{} ASC", order, order));
        assert_eq!(
            sql(&t, p),
            format!(
                "SELECT * FROM v WHERE _user_ = 'me' AND ({}) ORDER BY {} DESC,{} ASC",
                conditions, order, order
            )
        );
    }

    #[test]
    fn test_grouped_star_query_with_date_bounds() {
        let t = SqlTranslator::new(vec!["TIME.0".to_string()], vec!["TIME.0".to_string()]);
        let p = Projection::new()
            .with_fields(
                "*,COUNT(*) AS GROUP_TOTAL, MIN(STR_TO_DATE(`TIME.0`, '%a %b %e %H:%i:%s GMT %Y')) as FIRST_SEEN,\
                 MAX(STR_TO_DATE(TIME.0, '%a %b %e %H:%i:%s GMT %Y')) AS LAST_SEEN",
            )
            .with_grouping("GROUP_FIELD.10.5.0");
        assert_eq!(
            sql(&t, p),
            "SELECT *,COUNT(*) AS GROUP_TOTAL,MIN(STR_TO_DATE(`TIME.0`, '%a %b %e %H:%i:%s GMT %Y')) as FIRST_SEEN,\
             MAX(STR_TO_DATE(`TIME.0`, '%a %b %e %H:%i:%s GMT %Y')) AS LAST_SEEN FROM v WHERE _user_ = 'me' \
             GROUP BY `GROUP_FIELD.10.5.0`"
        );
    }

    #[test]
    fn test_order_clause_parsing() {
        let t = translator();
        let cases = [
            ("STR_TO_DATE(1,2) ASC,INET_ATON(3,4) DSC", "STR_TO_DATE(1,2) ASC,INET_ATON(3,4) DSC"),
            ("STR_TO_DATE(1, 2) ASC,INET_ATON(3, 4) DSC", "STR_TO_DATE(1, 2) ASC,INET_ATON(3, 4) DSC"),
            ("STR_TO_DATE(1, 2) ,INET_ATON(3, 4) DSC", "STR_TO_DATE(1, 2),INET_ATON(3, 4) DSC"),
            ("STR_TO_DATE(hey.there, 2) ,INET_ATON(3, 4) ", "STR_TO_DATE(`hey.there`, 2),INET_ATON(3, 4)"),
            (
                "STR_TO_DATE(hi.there, 2) ,INET_ATON(`hi.there`, 4) ",
                "STR_TO_DATE(`hi.there`, 2),INET_ATON(`hi.there`, 4)",
            ),
            (
                "MIN(STR_TO_DATE(ho.there, 2))   ASC ,INET_ATON(3, 4) ",
                "MIN(STR_TO_DATE(`ho.there`, 2)) ASC,INET_ATON(3, 4)",
            ),
        ];
        for (input, want) in cases {
            let got = t.build_order_clause(Some(input)).expect("order should build");
            assert_eq!(got.as_deref(), Some(want), "input: {}", input);
        }
    }

    #[test]
    fn test_is_function() {
        for token in [
            "MIN(foo.bar)",
            "COUNT(foo.bar)",
            "MAX(foo.bar)",
            "SUM(foo.bar)",
            "MIN(STR_TO_DATE(foo.bar, '%Y'))",
            "MAX(STR_TO_DATE(foo.bar, '%Y'))",
            "INET_ATON('1.2.3.4')",
            "INET_NTOA(10000)",
            "CONVERT('5',UNSIGNED)",
            "STR_TO_DATE(foo.bar, '%Y')",
        ] {
            assert_eq!(SqlTranslator::is_function(token), Ok(true), "token: {}", token);
        }
        assert_eq!(SqlTranslator::is_function("foo.bar"), Ok(false));
        assert_eq!(SqlTranslator::is_function("(a)"), Ok(false));
        assert_eq!(SqlTranslator::is_function("'x(y)'"), Ok(false));
    }

    #[test]
    fn test_disallowed_function_rejected() {
        let err = SqlTranslator::is_function("SIN(foo.bar)").unwrap_err();
        assert!(matches!(
            err,
            RecallError::Security(SecurityError::DisallowedFunction { .. })
        ));
        let err = SqlTranslator::is_function("MIN(SIN(foo.bar))").unwrap_err();
        assert!(matches!(err, RecallError::Security(_)));
    }

    #[test]
    fn test_disallowed_function_in_star_projection() {
        let t = translator();
        let err = t
            .generate_sql("v", &Projection::new().with_fields("*, notallowed(x)"), "me")
            .unwrap_err();
        assert!(matches!(
            err,
            RecallError::Security(SecurityError::DisallowedFunction { .. })
        ));
    }

    #[test]
    fn test_quote_field() {
        let t = translator();
        assert_eq!(t.quote_field("foo.bar").as_deref(), Ok("`foo.bar`"));
        assert_eq!(t.quote_field("MIN(foo.bar)").as_deref(), Ok("MIN(`foo.bar`)"));
        assert_eq!(t.quote_field("SUM(foo.bar)").as_deref(), Ok("SUM(`foo.bar`)"));
        assert_eq!(t.quote_field("COUNT(x.y)").as_deref(), Ok("COUNT(x.y)"));
        assert_eq!(t.quote_field("plain").as_deref(), Ok("plain"));
        assert_eq!(t.quote_field("*").as_deref(), Ok("*"));
    }

    #[test]
    fn test_invalid_view_rejected() {
        let t = translator();
        let err = t
            .generate_sql("v; DROP TABLE x", &Projection::new(), "me")
            .unwrap_err();
        assert!(matches!(
            err,
            RecallError::Validation(ValidationError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_owner_quotes_escaped() {
        let t = translator();
        let got = t
            .generate_sql("v", &Projection::new(), "o'brien")
            .expect("sql should generate");
        assert_eq!(got, "SELECT * FROM v WHERE _user_ = 'o''brien'");
    }

    #[test]
    fn test_injection_in_conditions_rejected() {
        let t = translator();
        for cond in [
            "a = 1; DROP TABLE cachedResultsQuery",
            "a = 1) OR 1=1; delete from x",
            "a IN (SELECT 1) UNION INSERT INTO t",
        ] {
            let err = t
                .generate_sql("v", &Projection::new().with_conditions(cond), "me")
                .unwrap_err();
            assert!(
                matches!(err, RecallError::Security(SecurityError::UnsafeSql { .. })),
                "cond: {}",
                cond
            );
        }
    }

    #[test]
    fn test_conditions_cannot_escape_owner_group() {
        let t = translator();
        for cond in [
            "1=0) UNION SELECT * FROM other WHERE (1=1",
            "1=0) OR (1=1",
            "a = 1)",
            "(a = 1",
            "a = 1) --",
        ] {
            let err = t
                .generate_sql("v", &Projection::new().with_conditions(cond), "me")
                .unwrap_err();
            assert!(
                matches!(err, RecallError::Security(SecurityError::UnsafeSql { .. })),
                "cond: {}",
                cond
            );
        }
    }

    #[test]
    fn test_parens_and_markers_inside_literals_allowed() {
        let t = translator();
        let p = Projection::new().with_conditions("a = ')' AND (b = 'x--y /* union')");
        let got = sql(&t, p);
        assert!(got.ends_with("AND (a = ')' AND (b = 'x--y /* union'))"));
    }

    #[test]
    fn test_union_and_comments_rejected() {
        for text in [
            "SELECT * FROM v WHERE _user_ = 'me' UNION SELECT * FROM w",
            "SELECT * FROM v WHERE _user_ = 'me' -- trailing",
            "SELECT * FROM v WHERE _user_ = 'me' /* hidden */",
        ] {
            assert!(check_sql_safe(text).is_err(), "text: {}", text);
        }
        assert!(check_sql_safe("SELECT * FROM v WHERE _user_ = 'a--b'").is_ok());
    }

    #[test]
    fn test_default_order_injection() {
        assert_eq!(
            with_default_order("SELECT * FROM v WHERE _user_ = 'me'"),
            "SELECT * FROM v WHERE _user_ = 'me' ORDER BY _eventId_"
        );
        let ordered = "SELECT * FROM v WHERE _user_ = 'me' order by a";
        assert_eq!(with_default_order(ordered), ordered);
    }

    #[test]
    fn test_tokenize_outside_parens() {
        let fields = "*,COUNT(*) AS GROUP_TOTAL, MIN(STR_TO_DATE(`UPTIME.0`, '%a %b %e %H:%i:%s GMT %Y')) as FIRST_SEEN,MAX(UPTIME.0) AS LAST_SEEN";
        let tokens = tokenize_outside_parens(fields, ',');
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], "*");
        assert_eq!(tokens[1], "COUNT(*) AS GROUP_TOTAL");
        assert_eq!(
            tokens[2],
            "MIN(STR_TO_DATE(`UPTIME.0`, '%a %b %e %H:%i:%s GMT %Y')) as FIRST_SEEN"
        );
        assert_eq!(tokens[3], "MAX(UPTIME.0) AS LAST_SEEN");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A statement separator followed by another statement is always rejected.
        #[test]
        fn prop_statement_separator_rejected(
            prefix in "[a-z0-9 =']{1,20}",
            stmt in prop::sample::select(vec!["DROP TABLE t", "SELECT 1", "delete from t", "x"]),
        ) {
            let sql = format!("SELECT * FROM v WHERE {}; {}", prefix, stmt);
            prop_assert!(check_sql_safe(&sql).is_err());
        }

        /// DDL and DML keywords are rejected wherever they appear.
        #[test]
        fn prop_reserved_keywords_rejected(
            keyword in prop::sample::select(vec![
                "create table", "DROP  TABLE", "alter\ttable", "drop database",
                "CREATE PROCEDURE", "delete ", "INSERT ",
            ]),
            before in "[a-z ]{0,10}",
            after in "[a-z ]{0,10}",
        ) {
            let sql = format!("SELECT * FROM v WHERE {}{}{}", before, keyword, after);
            prop_assert!(check_sql_safe(&sql).is_err());
        }

        /// The owner predicate leads every generated WHERE clause.
        #[test]
        fn prop_owner_predicate_always_present(
            owner in "[a-zA-Z0-9_.@-]{1,16}",
            cond in prop::option::of("[a-z]{1,6} = [0-9]{1,3}"),
        ) {
            let mut p = Projection::new();
            if let Some(c) = cond {
                p = p.with_conditions(c);
            }
            let sql = SqlTranslator::default().generate_sql("v", &p, &owner).expect("sql should generate");
            let expected = format!(" WHERE _user_ = '{}'", owner);
            prop_assert!(sql.contains(&expected));
        }
    }
}
