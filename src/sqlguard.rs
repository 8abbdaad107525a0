use regex::Regex;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, PartialEq)]
pub enum SqlGuardError {
    /// The response contained nothing that looks like a SQL statement.
    NoQueryFound,
    /// The statement contains a write or schema keyword; carries the keyword.
    DisallowedStatement(String),
}

impl fmt::Display for SqlGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlGuardError::NoQueryFound => {
                write!(f, "no SQL statement found in model response")
            }
            SqlGuardError::DisallowedStatement(kw) => {
                write!(f, "statement rejected: disallowed keyword {}", kw)
            }
        }
    }
}

impl Error for SqlGuardError {}

/// A single validated read-only statement extracted from a model response.
#[derive(Debug, Clone, Serialize)]
pub struct SqlQuery {
    pub statement: String,
    /// The statement came from a ``` fenced block rather than bare text.
    pub from_code_fence: bool,
    /// Trailing statements were present and discarded (first-statement policy).
    pub truncated_multi: bool,
}

// Group 1 is the language tag (a word followed by a newline), group 2 the
// fence body with the tag already stripped.
fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:([a-z0-9_+-]+)[ \t]*\r?\n)?(.*?)```").unwrap())
}

fn leading_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(select|with|insert|update|delete|drop|alter|create|attach|pragma)\b",
        )
        .unwrap()
    })
}

fn blacklist_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(insert|update|delete|drop|alter|create|attach|pragma)\b").unwrap()
    })
}

/// Isolates exactly one SQL statement from raw model output and validates it
/// as read-only.
///
/// Extraction order: the first ```sql fenced block, then the first untagged
/// fenced block, then the bare text. Blocks tagged with another language
/// (```json, ```text, ...) are never candidates; the tag itself is never part
/// of the candidate. Within the candidate, the statement runs from the first
/// SQL-leading keyword to the first `;` (inclusive) or the end of the
/// candidate. Anything after that is discarded and flagged on the returned
/// [`SqlQuery`], never silently.
///
/// Validation is a keyword blacklist, not a SQL parser: any write or schema
/// keyword anywhere in the selected statement rejects it.
pub fn extract_sql(raw_text: &str) -> Result<SqlQuery, SqlGuardError> {
    let mut sql_fences: Vec<&str> = Vec::new();
    let mut plain_fences: Vec<&str> = Vec::new();
    let mut foreign_fences = 0usize;
    for caps in fence_regex().captures_iter(raw_text) {
        let body = caps.get(2).map_or("", |m| m.as_str());
        match caps.get(1).map(|m| m.as_str()) {
            Some(tag) if tag.eq_ignore_ascii_case("sql") => sql_fences.push(body),
            Some(_) => foreign_fences += 1,
            None => plain_fences.push(body),
        }
    }

    let eligible = sql_fences.len() + plain_fences.len();
    let (candidate, from_code_fence) = if let Some(first) = sql_fences.first() {
        (*first, true)
    } else if let Some(first) = plain_fences.first() {
        (*first, true)
    } else if foreign_fences > 0 {
        // Every fence carries a non-SQL language tag; the model did not
        // answer with a query.
        return Err(SqlGuardError::NoQueryFound);
    } else {
        (raw_text, false)
    };

    let (statement, mut truncated_multi) =
        select_first_statement(candidate).ok_or(SqlGuardError::NoQueryFound)?;

    // More than one SQL-bearing block means more than one statement.
    if eligible > 1 {
        truncated_multi = true;
    }

    if let Some(m) = blacklist_regex().find(&statement) {
        return Err(SqlGuardError::DisallowedStatement(
            m.as_str().to_uppercase(),
        ));
    }

    let upper = statement.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(SqlGuardError::NoQueryFound);
    }
    // The English word "with" is common in prose; a real CTE always selects.
    if upper.starts_with("WITH") && !upper.contains("SELECT") {
        return Err(SqlGuardError::NoQueryFound);
    }

    Ok(SqlQuery {
        statement,
        from_code_fence,
        truncated_multi,
    })
}

/// Returns the first statement-like span and whether trailing content was cut.
fn select_first_statement(text: &str) -> Option<(String, bool)> {
    let start = leading_keyword_regex().find(text)?.start();
    let tail = &text[start..];

    match tail.find(';') {
        Some(end) => {
            let statement = tail[..=end].trim().to_string();
            let rest = tail[end + 1..].trim();
            Some((statement, !rest.is_empty()))
        }
        None => Some((tail.trim().to_string(), false)),
    }
}
