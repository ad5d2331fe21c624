//! Persistence for accounts, the JWT store, API keys, login attempts and
//! IP lists — all routed through the [`DatabaseQueueManager`] rather than
//! a direct pool handle, so every query goes through the same dispatch
//! and retry path as other database traffic.

use std::time::Duration;

use chrono::Utc;

use hydrogen_connectors::{ParamBindings, QueryOutcome, TypedParam, Value};
use hydrogen_dqm::{DatabaseQueueManager, QueryRequest};
use hydrogen_errors::Error;

use crate::model::{Account, IpListKind, LoginOutcome, StatusBits};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

async fn exec(dqm: &DatabaseQueueManager, sql: &str, params: ParamBindings) -> Result<QueryOutcome, Error> {
    let request = QueryRequest::new(sql, params);
    let result = dqm.run(request, DEFAULT_TIMEOUT).await?;
    result.outcome
}

fn str_at(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn int_at(row: &[Value], idx: usize) -> Option<i64> {
    match row.get(idx) {
        Some(Value::Integer(n)) => Some(*n),
        _ => None,
    }
}

/// Creates the auth tables if they don't already exist. Idempotent; safe
/// to call on every startup.
pub async fn ensure_schema(dqm: &DatabaseQueueManager) -> Result<(), Error> {
    const DDL: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS accounts (\
            id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL, password_hash VARCHAR(255) NOT NULL, \
            status_bits INTEGER NOT NULL, roles VARCHAR(255) NOT NULL, created_at VARCHAR(64) NOT NULL)",
        "CREATE TABLE IF NOT EXISTS account_contacts (\
            account_id INTEGER NOT NULL, contact_type VARCHAR(32) NOT NULL, contact VARCHAR(255) NOT NULL)",
        "CREATE TABLE IF NOT EXISTS jwt_store (\
            account_id INTEGER NOT NULL, token_hash VARCHAR(64) NOT NULL, expires_at INTEGER NOT NULL, \
            created_at VARCHAR(64) NOT NULL)",
        "CREATE TABLE IF NOT EXISTS api_keys (\
            key_text VARCHAR(255) NOT NULL, system_id VARCHAR(64) NOT NULL, app_id VARCHAR(64) NOT NULL, \
            valid_until INTEGER)",
        "CREATE TABLE IF NOT EXISTS login_attempts (\
            login_id VARCHAR(255) NOT NULL, client_ip VARCHAR(64) NOT NULL, user_agent VARCHAR(255), \
            ts INTEGER NOT NULL, success INTEGER NOT NULL)",
        "CREATE TABLE IF NOT EXISTS ip_lists (\
            ip VARCHAR(64) NOT NULL, kind VARCHAR(16) NOT NULL, expires_at INTEGER)",
    ];
    for ddl in DDL {
        exec(dqm, ddl, ParamBindings::new()).await?;
    }
    Ok(())
}

fn row_to_account(row: &[Value]) -> Option<Account> {
    let id = int_at(row, 0)?;
    let name = str_at(row, 1)?;
    let password_hash = str_at(row, 2)?;
    let status = StatusBits::from_bits_truncate(int_at(row, 3)? as u32);
    let roles = str_at(row, 4)
        .map(|s| s.split(',').filter(|r| !r.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    Some(Account { id, name, password_hash, status, email: None, roles })
}

async fn find_account_by_name(dqm: &DatabaseQueueManager, name: &str) -> Result<Option<Account>, Error> {
    let mut params = ParamBindings::new();
    params.insert("name", TypedParam::String(name.to_string()));
    let sql = "SELECT id, name, password_hash, status_bits, roles FROM accounts WHERE name = :name";
    let outcome = exec(dqm, sql, params).await?;
    Ok(outcome.rows.first().and_then(|row| row_to_account(row)))
}

async fn find_account_by_id(dqm: &DatabaseQueueManager, id: i64) -> Result<Option<Account>, Error> {
    let mut params = ParamBindings::new();
    params.insert("id", TypedParam::Integer(id));
    let sql = "SELECT id, name, password_hash, status_bits, roles FROM accounts WHERE id = :id";
    let outcome = exec(dqm, sql, params).await?;
    Ok(outcome.rows.first().and_then(|row| row_to_account(row)))
}

/// Looks up an account by username OR any registered contact value
/// (by name, then by contact). Two queries rather than a
/// join: the mock engine (and the spirit of keeping adapter SQL portable
/// across four dialects) only needs single-table `WHERE` filtering.
pub async fn find_account_by_login(dqm: &DatabaseQueueManager, login_id: &str) -> Result<Option<Account>, Error> {
    if let Some(account) = find_account_by_name(dqm, login_id).await? {
        return Ok(Some(account));
    }

    let mut params = ParamBindings::new();
    params.insert("contact", TypedParam::String(login_id.to_string()));
    let sql = "SELECT account_id FROM account_contacts WHERE contact = :contact";
    let outcome = exec(dqm, sql, params).await?;
    let Some(account_id) = outcome.rows.first().and_then(|r| int_at(r, 0)) else {
        return Ok(None);
    };
    find_account_by_id(dqm, account_id).await
}

pub async fn name_taken(dqm: &DatabaseQueueManager, name: &str) -> Result<bool, Error> {
    let mut params = ParamBindings::new();
    params.insert("name", TypedParam::String(name.to_string()));
    let outcome = exec(dqm, "SELECT id FROM accounts WHERE name = :name", params).await?;
    Ok(!outcome.rows.is_empty())
}

pub async fn contact_taken(dqm: &DatabaseQueueManager, contact: &str) -> Result<bool, Error> {
    let mut params = ParamBindings::new();
    params.insert("contact", TypedParam::String(contact.to_string()));
    let outcome = exec(dqm, "SELECT account_id FROM account_contacts WHERE contact = :contact", params).await?;
    Ok(!outcome.rows.is_empty())
}

pub async fn next_account_id(dqm: &DatabaseQueueManager) -> Result<i64, Error> {
    let outcome = exec(dqm, "SELECT id FROM accounts", ParamBindings::new()).await?;
    let max = outcome.rows.iter().filter_map(|r| int_at(r, 0)).max().unwrap_or(0);
    Ok(max + 1)
}

pub async fn insert_account(
    dqm: &DatabaseQueueManager,
    id: i64,
    name: &str,
    password_hash: &str,
    status: StatusBits,
) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("id", TypedParam::Integer(id));
    params.insert("name", TypedParam::String(name.to_string()));
    params.insert("hash", TypedParam::String(password_hash.to_string()));
    params.insert("status", TypedParam::Integer(status.bits() as i64));
    params.insert("roles", TypedParam::String(String::new()));
    params.insert("created_at", TypedParam::String(Utc::now().to_rfc3339()));
    let sql = "INSERT INTO accounts (id, name, password_hash, status_bits, roles, created_at) \
        VALUES (:id, :name, :hash, :status, :roles, :created_at)";
    exec(dqm, sql, params).await?;
    Ok(())
}

pub async fn insert_contact(dqm: &DatabaseQueueManager, account_id: i64, contact_type: &str, contact: &str) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("account_id", TypedParam::Integer(account_id));
    params.insert("contact_type", TypedParam::String(contact_type.to_string()));
    params.insert("contact", TypedParam::String(contact.to_string()));
    let sql = "INSERT INTO account_contacts (account_id, contact_type, contact) VALUES (:account_id, :contact_type, :contact)";
    exec(dqm, sql, params).await?;
    Ok(())
}

pub async fn contact_email(dqm: &DatabaseQueueManager, account_id: i64) -> Result<Option<String>, Error> {
    let mut params = ParamBindings::new();
    params.insert("account_id", TypedParam::Integer(account_id));
    let sql = "SELECT contact FROM account_contacts WHERE account_id = :account_id AND contact_type = 'email'";
    let outcome = exec(dqm, sql, params).await?;
    Ok(outcome.rows.first().and_then(|r| str_at(r, 0)))
}

/// Stores an issued token's hash. The `jwt_store` row's presence *is* the
/// validity signal for protected endpoints (see `DESIGN.md` for how this
/// reconciles with the data model's "revocation store" wording).
pub async fn store_token(dqm: &DatabaseQueueManager, account_id: i64, token_hash: &str, expires_at: i64) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("account_id", TypedParam::Integer(account_id));
    params.insert("token_hash", TypedParam::String(token_hash.to_string()));
    params.insert("expires_at", TypedParam::Integer(expires_at));
    params.insert("created_at", TypedParam::String(Utc::now().to_rfc3339()));
    let sql = "INSERT INTO jwt_store (account_id, token_hash, expires_at, created_at) \
        VALUES (:account_id, :token_hash, :expires_at, :created_at)";
    exec(dqm, sql, params).await?;
    Ok(())
}

pub async fn delete_token(dqm: &DatabaseQueueManager, token_hash: &str) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("token_hash", TypedParam::String(token_hash.to_string()));
    exec(dqm, "DELETE FROM jwt_store WHERE token_hash = :token_hash", params).await?;
    Ok(())
}

pub async fn token_is_active(dqm: &DatabaseQueueManager, token_hash: &str, now: i64) -> Result<bool, Error> {
    let mut params = ParamBindings::new();
    params.insert("token_hash", TypedParam::String(token_hash.to_string()));
    params.insert("now", TypedParam::Integer(now));
    let sql = "SELECT account_id FROM jwt_store WHERE token_hash = :token_hash AND expires_at > :now";
    let outcome = exec(dqm, sql, params).await?;
    Ok(!outcome.rows.is_empty())
}

/// Opportunistic GC of expired token rows, run on each login call rather
/// than from a background timer thread.
pub async fn revocation_gc(dqm: &DatabaseQueueManager, now: i64) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("now", TypedParam::Integer(now));
    exec(dqm, "DELETE FROM jwt_store WHERE expires_at < :now", params).await?;
    Ok(())
}

/// Split into two single-condition-group queries (no parenthesized OR)
/// so the SQL stays straightforward to filter across all four dialects.
pub async fn valid_api_key(dqm: &DatabaseQueueManager, api_key: &str, now: i64) -> Result<bool, Error> {
    let mut params = ParamBindings::new();
    params.insert("key", TypedParam::String(api_key.to_string()));
    let no_expiry = exec(dqm, "SELECT key_text FROM api_keys WHERE key_text = :key AND valid_until IS NULL", params.clone()).await?;
    if !no_expiry.rows.is_empty() {
        return Ok(true);
    }
    params.insert("now", TypedParam::Integer(now));
    let sql = "SELECT key_text FROM api_keys WHERE key_text = :key AND valid_until > :now";
    let outcome = exec(dqm, sql, params).await?;
    Ok(!outcome.rows.is_empty())
}

async fn ip_list_contains(dqm: &DatabaseQueueManager, ip: &str, kind: IpListKind, now: i64) -> Result<bool, Error> {
    let mut params = ParamBindings::new();
    params.insert("ip", TypedParam::String(ip.to_string()));
    params.insert("kind", TypedParam::String(kind.as_str().to_string()));
    let no_expiry = exec(
        dqm,
        "SELECT ip FROM ip_lists WHERE ip = :ip AND kind = :kind AND expires_at IS NULL",
        params.clone(),
    )
    .await?;
    if !no_expiry.rows.is_empty() {
        return Ok(true);
    }
    params.insert("now", TypedParam::Integer(now));
    let sql = "SELECT ip FROM ip_lists WHERE ip = :ip AND kind = :kind AND expires_at > :now";
    let outcome = exec(dqm, sql, params).await?;
    Ok(!outcome.rows.is_empty())
}

pub async fn is_whitelisted(dqm: &DatabaseQueueManager, ip: &str) -> Result<bool, Error> {
    ip_list_contains(dqm, ip, IpListKind::Whitelist, 0).await
}

pub async fn is_blacklisted(dqm: &DatabaseQueueManager, ip: &str) -> Result<bool, Error> {
    ip_list_contains(dqm, ip, IpListKind::Blacklist, 0).await
}

pub async fn is_tempblocked(dqm: &DatabaseQueueManager, ip: &str, now: i64) -> Result<bool, Error> {
    ip_list_contains(dqm, ip, IpListKind::Tempblock, now).await
}

pub async fn insert_tempblock(dqm: &DatabaseQueueManager, ip: &str, expires_at: i64) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("ip", TypedParam::String(ip.to_string()));
    params.insert("kind", TypedParam::String(IpListKind::Tempblock.as_str().to_string()));
    params.insert("expires_at", TypedParam::Integer(expires_at));
    let sql = "INSERT INTO ip_lists (ip, kind, expires_at) VALUES (:ip, :kind, :expires_at)";
    exec(dqm, sql, params).await?;
    Ok(())
}

pub async fn record_attempt(dqm: &DatabaseQueueManager, login_id: &str, client_ip: &str, ts: i64, outcome: LoginOutcome) -> Result<(), Error> {
    let mut params = ParamBindings::new();
    params.insert("login_id", TypedParam::String(login_id.to_string()));
    params.insert("client_ip", TypedParam::String(client_ip.to_string()));
    params.insert("ts", TypedParam::Integer(ts));
    params.insert("success", TypedParam::Boolean(outcome == LoginOutcome::Success));
    let sql = "INSERT INTO login_attempts (login_id, client_ip, ts, success) VALUES (:login_id, :client_ip, :ts, :success)";
    exec(dqm, sql, params).await?;
    Ok(())
}

/// Count of failed attempts for `(login_id, client_ip)` since `window_start`.
pub async fn failed_attempt_count(dqm: &DatabaseQueueManager, login_id: &str, client_ip: &str, window_start: i64) -> Result<u32, Error> {
    let mut params = ParamBindings::new();
    params.insert("login_id", TypedParam::String(login_id.to_string()));
    params.insert("client_ip", TypedParam::String(client_ip.to_string()));
    params.insert("window_start", TypedParam::Integer(window_start));
    let sql = "SELECT ts FROM login_attempts WHERE login_id = :login_id AND client_ip = :client_ip \
        AND ts >= :window_start AND success = 0";
    let outcome = exec(dqm, sql, params).await?;
    Ok(outcome.rows.len() as u32)
}
