//! Input validation for command-line and config values.
//!
//! Sprint states accept the tracker's names plus common synonyms. Resolution
//! is three-tier: exact match → synonym lookup → error with suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::model::SprintState;

// ── Valid value sets ─────────────────────────────────────────

pub static VALID_SPRINT_STATES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    SprintState::ALL.iter().map(SprintState::as_str).collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static SPRINT_STATE_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("open", "active"),
        ("current", "active"),
        ("started", "active"),
        ("running", "active"),
        ("in_progress", "active"),
        ("planned", "future"),
        ("upcoming", "future"),
        ("next", "future"),
        ("backlog", "future"),
        ("done", "closed"),
        ("complete", "closed"),
        ("completed", "closed"),
        ("finished", "closed"),
        ("ended", "closed"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a sprint state via exact match or synonym lookup.
///
/// Returns the state, or an error with the original input and an optional
/// suggestion.
pub fn normalize_sprint_state(input: &str) -> Result<SprintState, (String, Option<String>)> {
    let lower = input.trim().to_lowercase().replace('-', "_");

    if VALID_SPRINT_STATES.contains(lower.as_str()) {
        if let Some(state) = SprintState::parse(&lower) {
            return Ok(state);
        }
    }

    if let Some(&canonical) = SPRINT_STATE_SYNONYMS.get(lower.as_str()) {
        if let Some(state) = SprintState::parse(canonical) {
            return Ok(state);
        }
    }

    let suggestion = find_closest_match(&lower, &VALID_SPRINT_STATES, &SPRINT_STATE_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Normalize a list of sprint states, dropping duplicates.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` naming the first unknown state.
pub fn normalize_sprint_states<S: AsRef<str>>(inputs: &[S]) -> crate::error::Result<Vec<SprintState>> {
    let mut states = Vec::with_capacity(inputs.len());
    for input in inputs {
        let state = normalize_sprint_state(input.as_ref()).map_err(|(raw, suggestion)| {
            let mut msg = format!("unknown sprint state '{raw}'");
            if let Some(s) = suggestion {
                msg.push_str(&format!(" (did you mean '{s}'?)"));
            }
            crate::error::Error::InvalidArgument(msg)
        })?;
        if !states.contains(&state) {
            states.push(state);
        }
    }
    Ok(states)
}

/// Parse a numeric issue id.
///
/// Issue keys (`PROJ-12`) are rejected with a pointer to the numeric id,
/// since the store is keyed by id.
pub fn parse_issue_id(input: &str) -> Result<u64, (String, Option<String>)> {
    let trimmed = input.trim();
    if let Ok(id) = trimmed.parse::<u64>() {
        if id > 0 {
            return Ok(id);
        }
    }

    let looks_like_key = trimmed
        .split_once('-')
        .is_some_and(|(project, number)| {
            !project.is_empty() && !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
        });
    let hint = looks_like_key.then(|| {
        "issue keys are not accepted; pass the numeric issue id (see the key's `id` field)".to_string()
    });
    Err((input.to_string(), hint))
}

/// Tracks JQL string literals while a filter is scanned left to right.
///
/// Quote characters, and everything between them (escapes included), count
/// as inside a literal.
#[derive(Debug, Default)]
pub struct QuoteScanner {
    quote: Option<char>,
    escaped: bool,
}

impl QuoteScanner {
    /// Feed the next character. Returns whether it is outside any literal.
    pub fn outside(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match (self.quote, c) {
            (Some(_), '\\') => self.escaped = true,
            (Some(q), c) if c == q => self.quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => self.quote = Some(c),
            (None, _) => return true,
        }
        false
    }

    /// Whether the scan ended inside an unterminated literal.
    #[must_use]
    pub fn in_literal(&self) -> bool {
        self.quote.is_some()
    }
}

/// Basic sanity check for a JQL filter.
///
/// Only catches mistakes that would otherwise cost a remote round trip:
/// an empty filter, unbalanced parentheses, or an unterminated quote.
pub fn validate_filter(jql: &str) -> Result<(), String> {
    if jql.trim().is_empty() {
        return Err("filter is empty".to_string());
    }

    let mut depth: i32 = 0;
    let mut scanner = QuoteScanner::default();

    for c in jql.chars() {
        if !scanner.outside(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced ')' in filter".to_string());
                }
            }
            _ => {}
        }
    }

    if scanner.in_literal() {
        return Err("unterminated quote in filter".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '(' in filter".to_string());
    }
    Ok(())
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // Synonyms resolve to what they map to
            best = Some((synonyms.get(v).copied().unwrap_or(v), dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sprint_state() {
        assert_eq!(normalize_sprint_state("active"), Ok(SprintState::Active));
        assert_eq!(normalize_sprint_state("open"), Ok(SprintState::Active));
        assert_eq!(normalize_sprint_state("Planned"), Ok(SprintState::Future));
        assert_eq!(normalize_sprint_state("done"), Ok(SprintState::Closed));
        assert_eq!(normalize_sprint_state("in-progress"), Ok(SprintState::Active));
    }

    #[test]
    fn test_normalize_sprint_state_suggests() {
        let (raw, suggestion) = normalize_sprint_state("futur").unwrap_err();
        assert_eq!(raw, "futur");
        assert_eq!(suggestion.as_deref(), Some("future"));

        let (_, suggestion) = normalize_sprint_state("zzzzzzzzzz").unwrap_err();
        assert!(suggestion.is_none());
    }

    #[test]
    fn test_normalize_sprint_states_dedupes() {
        let states = normalize_sprint_states(&["open", "active", "future"]).unwrap();
        assert_eq!(states, vec![SprintState::Active, SprintState::Future]);

        let err = normalize_sprint_states(&["clsoed"]).unwrap_err();
        assert!(err.to_string().contains("did you mean 'closed'"));
    }

    #[test]
    fn test_parse_issue_id() {
        assert_eq!(parse_issue_id("10042"), Ok(10042));
        assert!(parse_issue_id("0").is_err());

        let (_, hint) = parse_issue_id("PROJ-12").unwrap_err();
        assert!(hint.is_some());

        let (_, hint) = parse_issue_id("banana").unwrap_err();
        assert!(hint.is_none());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("project = PROJ ORDER BY updated").is_ok());
        assert!(validate_filter("summary ~ \"a (b\"").is_ok());
        assert!(validate_filter("   ").is_err());
        assert!(validate_filter("(project = PROJ").is_err());
        assert!(validate_filter("project = PROJ)").is_err());
        assert!(validate_filter("summary ~ \"open").is_err());
        assert!(validate_filter("summary ~ \"say \\\"(\\\"\"").is_ok());
    }

    #[test]
    fn test_quote_scanner_marks_literals() {
        let mut scanner = QuoteScanner::default();
        let outside: String = "a 'b c' d"
            .chars()
            .filter(|&c| scanner.outside(c))
            .collect();
        assert_eq!(outside, "a  d");
        assert!(!scanner.in_literal());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
