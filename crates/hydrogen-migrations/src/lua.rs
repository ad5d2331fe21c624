//! Phase LOAD: executes a migration's Lua script in a fresh interpreter and
//! collects the SQL batch it returns.

use hydrogen_errors::Error;
use mlua::{Lua, Variadic};

/// Installs the `hydrogen` helper table every migration script sees:
/// `hydrogen.qd` is the `-- QUERY DELIMITER` literal, and `hydrogen.hash(…)`
/// builds a `${SHA256_HASH_*}` macro span from one or more SQL operands.
fn install_helpers(lua: &Lua) -> mlua::Result<()> {
    let hydrogen = lua.create_table()?;
    hydrogen.set("qd", "-- QUERY DELIMITER")?;

    let hash_fn = lua.create_function(|_, operands: Variadic<String>| {
        let mut macro_span = String::from("${SHA256_HASH_START}");
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                macro_span.push_str("${SHA256_HASH_MID}");
            }
            macro_span.push_str(operand);
        }
        macro_span.push_str("${SHA256_HASH_END}");
        Ok(macro_span)
    })?;
    hydrogen.set("hash", hash_fn)?;

    lua.globals().set("hydrogen", hydrogen)?;
    Ok(())
}

/// Runs `script` (named `name` for error messages) and returns the SQL
/// string it evaluates to. A fresh `Lua` instance per file.
pub fn load_sql(name: &str, script: &str) -> Result<String, Error> {
    let lua = Lua::new();
    install_helpers(&lua).map_err(|e| Error::internal(format!("installing lua helpers for '{name}': {e}")))?;

    lua.load(script)
        .set_name(name)
        .eval::<String>()
        .map_err(|e| Error::internal(format!("migration script '{name}' failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_plain_sql_string() {
        let sql = load_sql("m1.lua", "return 'CREATE TABLE t (id INT)'").unwrap();
        assert_eq!(sql, "CREATE TABLE t (id INT)");
    }

    #[test]
    fn qd_helper_joins_statements() {
        let script = r#"
            return table.concat({ "CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)" }, hydrogen.qd)
        "#;
        let sql = load_sql("m2.lua", script).unwrap();
        assert_eq!(sql, "CREATE TABLE a (id INT)-- QUERY DELIMITERCREATE TABLE b (id INT)");
    }

    #[test]
    fn hash_helper_builds_macro_span() {
        let script = "return hydrogen.hash(\"'42'\", \"'Hello'\")";
        let sql = load_sql("m3.lua", script).unwrap();
        assert_eq!(sql, "${SHA256_HASH_START}'42'${SHA256_HASH_MID}'Hello'${SHA256_HASH_END}");
    }

    #[test]
    fn script_error_is_reported_with_file_name() {
        let err = load_sql("broken.lua", "error('boom')").unwrap_err();
        assert!(err.to_string().contains("broken.lua"));
    }
}
