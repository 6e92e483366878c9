//! Search filter helpers.

use chrono::{DateTime, Utc};

use crate::validate::QuoteScanner;

/// Narrow `filter` to issues updated since roughly `last_update`.
///
/// Produces `(<query>) AND updated >= -Nd`, where `N` is the number of whole
/// days since `last_update` plus one, so the window always overlaps the
/// previous run. The query is parenthesized so the window binds to all of
/// it, and the clause goes before a trailing `ORDER BY` (one outside string
/// literals). With no previous update the filter is returned unchanged.
#[must_use]
pub fn with_updated_window(
    filter: &str,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    let Some(last_update) = last_update else {
        return filter.to_string();
    };

    let days = (now - last_update).num_days().max(0) + 1;
    let window = format!("updated >= -{days}d");

    let (query, order) = split_order_by(filter);
    let query = query.trim();
    let mut out = if query.is_empty() {
        window
    } else {
        format!("({query}) AND {window}")
    };
    if let Some(order) = order {
        out.push(' ');
        out.push_str(order.trim());
    }
    out
}

/// Split off the last `ORDER BY` clause outside string literals, matched
/// case-insensitively.
fn split_order_by(filter: &str) -> (&str, Option<&str>) {
    // Same byte length as `filter`, with literals blanked out
    let mut scanner = QuoteScanner::default();
    let masked: String = filter
        .chars()
        .flat_map(|c| {
            let visible = scanner.outside(c);
            let width = if visible { 1 } else { c.len_utf8() };
            std::iter::repeat_n(if visible { c.to_ascii_uppercase() } else { ' ' }, width)
        })
        .collect();

    let starts_clause = |pos: usize| {
        masked[..pos]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace() || c == ')')
    };
    match masked
        .rmatch_indices("ORDER BY")
        .map(|(pos, _)| pos)
        .find(|&pos| starts_clause(pos))
    {
        Some(pos) => (&filter[..pos], Some(&filter[pos..])),
        None => (filter, None),
    }
}
