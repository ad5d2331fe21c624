//! Cross-dialect hash macro substitution so one migration script produces
//! the right hash expression on every dialect.
//!
//! A migration emits `${SHA256_HASH_START}<lhs>${SHA256_HASH_MID}<rhs>${SHA256_HASH_END}`
//! (any number of `_MID`-joined operands in the middle); this module
//! substitutes that into each engine's native SHA-256-then-base64
//! expression.

use crate::model::Engine;

const START: &str = "${SHA256_HASH_START}";
const MID: &str = "${SHA256_HASH_MID}";
const END: &str = "${SHA256_HASH_END}";

/// Rewrites every `${SHA256_HASH_START}...${SHA256_HASH_END}` span in `sql`
/// into the engine-native hashing expression. Operands between `START`/`MID`
/// tokens are concatenated with the engine's native `CONCAT`-equivalent.
pub fn substitute_hash_macros(sql: &str, engine: Engine) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    while let Some(start_idx) = rest.find(START) {
        out.push_str(&rest[..start_idx]);
        let after_start = &rest[start_idx + START.len()..];
        let Some(end_idx) = after_start.find(END) else {
            // No matching END: leave the rest untouched rather than guess.
            out.push_str(START);
            rest = after_start;
            continue;
        };
        let body = &after_start[..end_idx];
        let operands: Vec<&str> = body.split(MID).map(str::trim).collect();
        out.push_str(&render_hash_expr(engine, &operands));
        rest = &after_start[end_idx + END.len()..];
    }
    out.push_str(rest);
    out
}

fn render_hash_expr(engine: Engine, operands: &[&str]) -> String {
    let concat = render_concat(engine, operands);
    match engine {
        Engine::Postgres => format!("ENCODE(SHA256({concat})::bytea,'base64')"),
        Engine::MySql => format!("TO_BASE64(SHA2({concat},256))"),
        Engine::Sqlite => format!("CRYPTO_ENCODE(CRYPTO_HASH('sha256',{concat}),'base64')"),
        Engine::Db2 => format!(
            "BASE64ENCODE(HASH('SHA256', CAST({concat} AS VARCHAR(4000) FOR BIT DATA)))"
        ),
    }
}

fn render_concat(engine: Engine, operands: &[&str]) -> String {
    if operands.len() == 1 {
        return operands[0].to_string();
    }
    match engine {
        Engine::Sqlite => operands.join(" || "),
        _ => format!("CONCAT({})", operands.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_macro_substitution_postgres_and_mysql() {
        let sql = "${SHA256_HASH_START}'42'${SHA256_HASH_MID}'Hello'${SHA256_HASH_END}";
        assert_eq!(
            substitute_hash_macros(sql, Engine::Postgres),
            "ENCODE(SHA256(CONCAT('42','Hello'))::bytea,'base64')"
        );
        assert_eq!(
            substitute_hash_macros(sql, Engine::MySql),
            "TO_BASE64(SHA2(CONCAT('42','Hello'),256))"
        );
    }

    #[test]
    fn sqlite_and_db2_render() {
        let sql = "${SHA256_HASH_START}'42'${SHA256_HASH_MID}'Hello'${SHA256_HASH_END}";
        assert_eq!(
            substitute_hash_macros(sql, Engine::Sqlite),
            "CRYPTO_ENCODE(CRYPTO_HASH('sha256','42' || 'Hello'),'base64')"
        );
        assert!(substitute_hash_macros(sql, Engine::Db2).starts_with("BASE64ENCODE(HASH('SHA256'"));
    }

    #[test]
    fn single_operand_skips_concat() {
        let sql = "${SHA256_HASH_START}'solo'${SHA256_HASH_END}";
        assert_eq!(
            substitute_hash_macros(sql, Engine::Postgres),
            "ENCODE(SHA256('solo')::bytea,'base64')"
        );
    }

    #[test]
    fn leaves_surrounding_sql_untouched() {
        let sql = "UPDATE t SET h = ${SHA256_HASH_START}a${SHA256_HASH_MID}b${SHA256_HASH_END} WHERE id = 1";
        let out = substitute_hash_macros(sql, Engine::Postgres);
        assert!(out.starts_with("UPDATE t SET h = ENCODE"));
        assert!(out.ends_with("WHERE id = 1"));
    }
}
