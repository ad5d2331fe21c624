//! Queue selection algorithm.

use hydrogen_connectors::ParamBindings;
use hydrogen_qtc::{QtcEntry, QueueHint};

/// Bound-param count under which a read-only SELECT is routed to `fast`.
const FAST_SELECT_PARAM_CEILING: usize = 3;

/// Picks a queue tag for a request that didn't carry an explicit hint and
/// whose `query_ref` (if any) isn't in the QTC or carries no hint of its
/// own. Steps 1-2 of the algorithm (explicit hint, QTC hint) are the
/// caller's responsibility since they're cheap lookups; this is step 3.
pub fn classify(sql: &str, params: &ParamBindings) -> QueueHint {
    let trimmed = sql.trim_start();
    let is_select = trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("select");

    if is_select {
        let upper = trimmed.to_ascii_uppercase();
        let has_aggregation = ["GROUP BY", "COUNT(", "SUM(", "AVG(", "HAVING"]
            .iter()
            .any(|kw| upper.contains(kw));
        if has_aggregation {
            return QueueHint::Slow;
        }
        if params.len() <= FAST_SELECT_PARAM_CEILING {
            return QueueHint::Fast;
        }
        return QueueHint::Medium;
    }

    QueueHint::Medium
}

/// Resolves the final tag for a request: explicit hint, then QTC hint, then
/// the classification heuristic.
pub fn resolve_tag(
    explicit_hint: Option<QueueHint>,
    qtc_entry: Option<&QtcEntry>,
    sql: &str,
    params: &ParamBindings,
) -> QueueHint {
    if let Some(hint) = explicit_hint {
        return hint;
    }
    if let Some(entry) = qtc_entry {
        if let Some(hint) = entry.queue_hint {
            return hint;
        }
    }
    classify(sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_connectors::ParamBindings;

    #[test]
    fn plain_select_with_few_params_is_fast() {
        let tag = classify("SELECT * FROM accounts WHERE id = :id", &ParamBindings::new());
        assert_eq!(tag, QueueHint::Fast);
    }

    #[test]
    fn aggregation_select_is_slow() {
        let tag = classify("SELECT count(*) FROM login_attempts GROUP BY client_ip", &ParamBindings::new());
        assert_eq!(tag, QueueHint::Slow);
    }

    #[test]
    fn write_statement_is_medium() {
        let tag = classify("INSERT INTO accounts (name) VALUES (:name)", &ParamBindings::new());
        assert_eq!(tag, QueueHint::Medium);
    }

    #[test]
    fn explicit_hint_wins_over_everything() {
        let tag = resolve_tag(Some(QueueHint::Cache), None, "SELECT 1", &ParamBindings::new());
        assert_eq!(tag, QueueHint::Cache);
    }

    #[test]
    fn qtc_hint_wins_over_classification() {
        let entry = QtcEntry {
            query_ref: 1,
            sql_template: "SELECT 1".into(),
            queue_hint: Some(QueueHint::Slow),
            description: String::new(),
            version: 1,
        };
        let tag = resolve_tag(None, Some(&entry), "SELECT 1", &ParamBindings::new());
        assert_eq!(tag, QueueHint::Slow);
    }
}
