//! Paramstyle rewriting.
//!
//! The cursor accepts SQL in one of five placeholder styles and rewrites it
//! to the server-native `$N` form. The scanner is quote-aware: placeholders
//! inside `'...'`, `E'...'`, `"..."`, `$tag$...$tag$`, `--` comments, and
//! nested `/* */` comments are preserved literally. The rewrite is
//! deterministic and idempotent.

use crate::error::{PgError, PgResult};

/// Client-side placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?`
    Qmark,
    /// `:1`, `:2`, ...
    Numeric,
    /// `:name`
    Named,
    /// `%s`
    Format,
    /// `%(name)s`
    Pyformat,
}

/// How the rewritten statement consumes its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholders {
    /// `$1..$N` bound positionally.
    Positional(usize),
    /// `$N` is bound from the named parameter at the same index. Repeated
    /// names collapse onto one placeholder.
    Named(Vec<String>),
}

/// A statement rewritten to `$N` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSql {
    pub sql: String,
    pub placeholders: Placeholders,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// If `chars[i..]` opens a dollar quote, return the tag and the index just
/// past the opening delimiter. Tags cannot start with a digit, which is what
/// keeps `$1` placeholders out of this path.
fn dollar_tag(chars: &[char], i: usize) -> Option<(String, usize)> {
    debug_assert_eq!(chars[i], '$');
    let mut j = i + 1;
    let mut tag = String::new();
    while j < chars.len() {
        let c = chars[j];
        if c == '$' {
            return Some((tag, j + 1));
        }
        if tag.is_empty() && !is_ident_start(c) {
            return None;
        }
        if !tag.is_empty() && !is_ident_char(c) {
            return None;
        }
        tag.push(c);
        j += 1;
    }
    None
}

/// Rewrite `sql` from `style` to `$N` placeholders.
pub fn rewrite(style: ParamStyle, sql: &str) -> PgResult<RewrittenSql> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;

    let mut style = style;
    let mut positional = 0usize;
    let mut max_index = 0usize;
    let mut names: Vec<String> = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '\'' => {
                let e_string = i > 0 && matches!(chars[i - 1], 'e' | 'E')
                    && (i < 2 || !is_ident_char(chars[i - 2]));
                out.push(c);
                i += 1;
                // Copy the literal body verbatim.
                while i < chars.len() {
                    let b = chars[i];
                    out.push(b);
                    i += 1;
                    if e_string && b == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            out.push(escaped);
                            i += 1;
                        }
                        continue;
                    }
                    if b == '\'' {
                        if chars.get(i) == Some(&'\'') {
                            out.push('\'');
                            i += 1; // doubled quote stays inside
                        } else {
                            break;
                        }
                    }
                }
            }
            '"' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let b = chars[i];
                    out.push(b);
                    i += 1;
                    if b == '"' {
                        if chars.get(i) == Some(&'"') {
                            out.push('"');
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let mut depth = 0usize;
                while i < chars.len() {
                    if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        depth += 1;
                        out.push('/');
                        out.push('*');
                        i += 2;
                    } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        depth -= 1;
                        out.push('*');
                        out.push('/');
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        out.push(chars[i]);
                        i += 1;
                    }
                }
            }
            '$' => {
                if let Some((tag, body_start)) = dollar_tag(&chars, i) {
                    // Copy through the matching closing delimiter.
                    let closing: Vec<char> =
                        format!("${}$", tag).chars().collect();
                    for &d in &chars[i..body_start] {
                        out.push(d);
                    }
                    i = body_start;
                    loop {
                        if i + closing.len() <= chars.len() && chars[i..i + closing.len()] == closing[..] {
                            for &d in &closing {
                                out.push(d);
                            }
                            i += closing.len();
                            break;
                        }
                        if i >= chars.len() {
                            break; // unterminated; preserved as written
                        }
                        out.push(chars[i]);
                        i += 1;
                    }
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            '?' if style == ParamStyle::Qmark => {
                positional += 1;
                out.push_str(&format!("${}", positional));
                i += 1;
            }
            ':' if style == ParamStyle::Numeric => {
                if next == Some(':') {
                    out.push_str("::");
                    i += 2; // cast operator
                } else if next.map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    let mut j = i + 1;
                    let mut digits = String::new();
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        digits.push(chars[j]);
                        j += 1;
                    }
                    let index: usize = digits.parse().map_err(|_| {
                        PgError::Interface(format!("invalid numeric placeholder :{}", digits))
                    })?;
                    max_index = max_index.max(index);
                    out.push_str(&format!("${}", digits));
                    i = j;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            ':' if style == ParamStyle::Named => {
                if next == Some(':') {
                    out.push_str("::");
                    i += 2;
                } else if next.map(is_ident_start).unwrap_or(false) {
                    let mut j = i + 1;
                    let mut name = String::new();
                    while j < chars.len() && is_ident_char(chars[j]) {
                        name.push(chars[j]);
                        j += 1;
                    }
                    let index = match names.iter().position(|n| n == &name) {
                        Some(pos) => pos + 1,
                        None => {
                            names.push(name);
                            names.len()
                        }
                    };
                    out.push_str(&format!("${}", index));
                    i = j;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            '%' if matches!(style, ParamStyle::Format | ParamStyle::Pyformat) => {
                match next {
                    Some('%') => {
                        out.push('%');
                        i += 2;
                    }
                    Some('s') => {
                        if style == ParamStyle::Pyformat {
                            if !names.is_empty() {
                                return Err(PgError::Interface(
                                    "cannot mix %(name)s and %s placeholders".to_string(),
                                ));
                            }
                            style = ParamStyle::Format;
                        }
                        positional += 1;
                        out.push_str(&format!("${}", positional));
                        i += 2;
                    }
                    Some('(') if style == ParamStyle::Pyformat => {
                        let mut j = i + 2;
                        let mut name = String::new();
                        while j < chars.len() && chars[j] != ')' {
                            name.push(chars[j]);
                            j += 1;
                        }
                        if chars.get(j) != Some(&')') || chars.get(j + 1) != Some(&'s') {
                            return Err(PgError::Interface(format!(
                                "malformed pyformat placeholder %({})...",
                                name
                            )));
                        }
                        let index = match names.iter().position(|n| n == &name) {
                            Some(pos) => pos + 1,
                            None => {
                                names.push(name);
                                names.len()
                            }
                        };
                        out.push_str(&format!("${}", index));
                        i = j + 2;
                    }
                    _ => {
                        // A lone percent (e.g. the modulo operator) passes
                        // through, which keeps the rewrite idempotent.
                        out.push('%');
                        i += 1;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    let placeholders = if !names.is_empty() {
        Placeholders::Named(names)
    } else {
        Placeholders::Positional(positional.max(max_index))
    };
    Ok(RewrittenSql { sql: out, placeholders })
}

/// First keyword of a statement, uppercased, skipping leading whitespace and
/// comments.
pub(crate) fn first_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = match stripped.find('\n') {
                Some(idx) => stripped[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(idx) => stripped[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            break;
        }
    }
    rest.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(';')
        .to_ascii_uppercase()
}

/// Transaction-control verbs always take the simple-query path.
pub(crate) fn is_transaction_verb(sql: &str) -> bool {
    matches!(
        first_keyword(sql).as_str(),
        "BEGIN" | "COMMIT" | "ROLLBACK" | "START" | "END" | "SAVEPOINT" | "RELEASE" | "ABORT"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(style: ParamStyle, sql: &str) -> RewrittenSql {
        rewrite(style, sql).unwrap()
    }

    #[test]
    fn test_qmark_basic() {
        let r = rw(ParamStyle::Qmark, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(r.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(r.placeholders, Placeholders::Positional(2));
    }

    #[test]
    fn test_numeric_basic() {
        let r = rw(ParamStyle::Numeric, "SELECT :2, :1");
        assert_eq!(r.sql, "SELECT $2, $1");
        assert_eq!(r.placeholders, Placeholders::Positional(2));
    }

    #[test]
    fn test_numeric_leaves_casts_alone() {
        let r = rw(ParamStyle::Numeric, "SELECT :1::int, 'x'::text");
        assert_eq!(r.sql, "SELECT $1::int, 'x'::text");
    }

    #[test]
    fn test_named_basic_and_repeat() {
        let r = rw(ParamStyle::Named, "SELECT :a, :b, :a");
        assert_eq!(r.sql, "SELECT $1, $2, $1");
        assert_eq!(
            r.placeholders,
            Placeholders::Named(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_format_basic_and_escape() {
        let r = rw(ParamStyle::Format, "INSERT INTO t VALUES (%s, %s)");
        assert_eq!(r.sql, "INSERT INTO t VALUES ($1, $2)");
        let r = rw(ParamStyle::Format, "SELECT '100%%' , %s");
        assert_eq!(r.sql, "SELECT '100%%' , $1");
    }

    #[test]
    fn test_pyformat_named_and_repeat() {
        let r = rw(
            ParamStyle::Pyformat,
            "UPDATE t SET a = %(a)s WHERE b = %(b)s AND c = %(a)s",
        );
        assert_eq!(r.sql, "UPDATE t SET a = $1 WHERE b = $2 AND c = $1");
        assert_eq!(
            r.placeholders,
            Placeholders::Named(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_pyformat_mixing_rejected() {
        assert!(rewrite(ParamStyle::Pyformat, "SELECT %(a)s, %s").is_err());
    }

    #[test]
    fn test_placeholders_in_single_quotes_preserved() {
        let r = rw(ParamStyle::Qmark, "SELECT '?' , ?");
        assert_eq!(r.sql, "SELECT '?' , $1");
        assert_eq!(r.placeholders, Placeholders::Positional(1));
    }

    #[test]
    fn test_placeholders_in_escaped_quotes_preserved() {
        let r = rw(ParamStyle::Qmark, r"SELECT 'it''s ?', E'a\'b ?', ?");
        assert_eq!(r.sql, r"SELECT 'it''s ?', E'a\'b ?', $1");
    }

    #[test]
    fn test_placeholders_in_identifiers_preserved() {
        let r = rw(ParamStyle::Qmark, r#"SELECT "weird?col" FROM t WHERE a = ?"#);
        assert_eq!(r.sql, r#"SELECT "weird?col" FROM t WHERE a = $1"#);
    }

    #[test]
    fn test_placeholders_in_dollar_quotes_preserved() {
        let r = rw(ParamStyle::Qmark, "SELECT $tag$ ? :x %s $tag$, ?");
        assert_eq!(r.sql, "SELECT $tag$ ? :x %s $tag$, $1");
        let r = rw(ParamStyle::Format, "SELECT $$ %s $$, %s");
        assert_eq!(r.sql, "SELECT $$ %s $$, $1");
    }

    #[test]
    fn test_placeholders_in_comments_preserved() {
        let r = rw(ParamStyle::Qmark, "SELECT ? -- was ? here\n, ?");
        assert_eq!(r.sql, "SELECT $1 -- was ? here\n, $2");
        let r = rw(ParamStyle::Qmark, "SELECT /* ? /* nested ? */ still ? */ ?");
        assert_eq!(r.sql, "SELECT /* ? /* nested ? */ still ? */ $1");
    }

    #[test]
    fn test_dollar_placeholder_not_a_quote() {
        // $1 must not open a dollar-quoted string.
        let r = rw(ParamStyle::Qmark, "SELECT $1, $2");
        assert_eq!(r.sql, "SELECT $1, $2");
        assert_eq!(r.placeholders, Placeholders::Positional(0));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let cases = [
            (ParamStyle::Qmark, "SELECT ?, '?', $$ ? $$ -- ?"),
            (ParamStyle::Numeric, "SELECT :1::int, ':2'"),
            (ParamStyle::Named, "SELECT :a, ':b', 5 % 2"),
            (ParamStyle::Format, "SELECT %s, '%s', 5 % 2"),
            (ParamStyle::Pyformat, "SELECT %(a)s, '%(b)s'"),
        ];
        for (style, sql) in cases {
            let first = rw(style, sql);
            let second = rw(style, &first.sql);
            assert_eq!(first.sql, second.sql, "style {:?}", style);
        }
    }

    #[test]
    fn test_modulo_passes_through() {
        let r = rw(ParamStyle::Format, "SELECT 5 % 2, %s");
        assert_eq!(r.sql, "SELECT 5 % 2, $1");
    }

    #[test]
    fn test_first_keyword() {
        assert_eq!(first_keyword("  select 1"), "SELECT");
        assert_eq!(first_keyword("-- c\n  BEGIN"), "BEGIN");
        assert_eq!(first_keyword("/* x */ vacuum full"), "VACUUM");
        assert_eq!(first_keyword("COMMIT;"), "COMMIT");
        assert_eq!(first_keyword(""), "");
    }

    #[test]
    fn test_transaction_verbs() {
        assert!(is_transaction_verb("BEGIN"));
        assert!(is_transaction_verb("  rollback"));
        assert!(is_transaction_verb("START TRANSACTION"));
        assert!(!is_transaction_verb("SELECT 1"));
        assert!(!is_transaction_verb("VACUUM"));
    }
}
