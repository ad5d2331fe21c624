//! Named-parameter rewriting: the public API accepts `:name` placeholders;
//! adapters rewrite them to the engine's native positional style while
//! keeping a binding array ordered by first appearance.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Engine, ParamBindings, TypedParam};

static NAMED_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// The engine-native placeholder style used when rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL: `$1`, `$2`, ...
    Dollar,
    /// MySQL, SQLite, DB2: positional `?`.
    Question,
}

pub fn placeholder_style(engine: Engine) -> PlaceholderStyle {
    match engine {
        Engine::Postgres => PlaceholderStyle::Dollar,
        Engine::MySql | Engine::Sqlite | Engine::Db2 => PlaceholderStyle::Question,
    }
}

/// Rewrites `:name` placeholders in `sql` to the engine's native style,
/// returning the rewritten SQL and the parameter names in first-appearance
/// order (duplicates re-use the same position in `Dollar` style, and repeat
/// the placeholder for `Question` style, since `?` binding is positional).
pub fn rewrite_named_params(sql: &str, style: PlaceholderStyle) -> (String, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let rewritten = NAMED_PARAM.replace_all(sql, |caps: &regex::Captures| {
        let name = caps[1].to_string();
        match style {
            PlaceholderStyle::Dollar => {
                let pos = order.iter().position(|n| n == &name).unwrap_or_else(|| {
                    order.push(name.clone());
                    order.len() - 1
                });
                format!("${}", pos + 1)
            }
            PlaceholderStyle::Question => {
                order.push(name.clone());
                "?".to_string()
            }
        }
    });
    (rewritten.into_owned(), order)
}

/// Resolves each name in `order` (first-appearance order from
/// `rewrite_named_params`) against `bindings`, producing the positional
/// argument list the driver actually binds. A name absent from `bindings`
/// binds as SQL `NULL`.
pub fn resolve_in_order(order: &[String], bindings: &ParamBindings) -> Vec<TypedParam> {
    order
        .iter()
        .map(|name| bindings.get(name).cloned().unwrap_or(TypedParam::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_style_dedupes_repeated_names() {
        let (sql, order) =
            rewrite_named_params("SELECT * FROM t WHERE a = :x AND b = :x", PlaceholderStyle::Dollar);
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $1");
        assert_eq!(order, vec!["x"]);
    }

    #[test]
    fn question_style_repeats_placeholder_per_occurrence() {
        let (sql, order) = rewrite_named_params(
            "SELECT * FROM t WHERE a = :x AND b = :y",
            PlaceholderStyle::Question,
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn first_appearance_order_is_preserved() {
        let (_, order) = rewrite_named_params(":b, :a, :c", PlaceholderStyle::Question);
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}
