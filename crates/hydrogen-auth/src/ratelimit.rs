//! Rate limiting: blacklist/whitelist/tempblock short-circuits plus a
//! trailing-window failed-attempt counter.
//!
//! Window = 900s, threshold = 5 failed attempts per `(login_id,
//! client_ip)`, block duration = 900s. Whitelisted IPs bypass the block
//! but still produce `login_attempts` rows.

use hydrogen_dqm::DatabaseQueueManager;
use hydrogen_errors::Error;

use crate::store;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_secs: i64,
    pub max_attempts: u32,
    pub block_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_secs: 900, max_attempts: 5, block_secs: 900 }
    }
}

/// Checked before any credential verification. Returns
/// `Err(TooManyRequests)` if the caller must be short-circuited without
/// touching the account table; `Ok(())` otherwise.
pub async fn check(
    dqm: &DatabaseQueueManager,
    config: &RateLimitConfig,
    login_id: &str,
    client_ip: &str,
    now: i64,
) -> Result<(), Error> {
    if store::is_blacklisted(dqm, client_ip).await? {
        return Err(Error::forbidden("client ip is blacklisted"));
    }

    let whitelisted = store::is_whitelisted(dqm, client_ip).await?;
    if whitelisted {
        return Ok(());
    }

    if store::is_tempblocked(dqm, client_ip, now).await? {
        return Err(Error::too_many_requests(config.block_secs as u64));
    }

    let window_start = now - config.window_secs;
    let failed = store::failed_attempt_count(dqm, login_id, client_ip, window_start).await?;
    if failed >= config.max_attempts {
        store::insert_tempblock(dqm, client_ip, now + config.block_secs).await?;
        return Err(Error::too_many_requests(config.block_secs as u64));
    }

    Ok(())
}
