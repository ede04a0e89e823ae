//! Environment variable utilities
//!
//! Configuration reads its overrides through these helpers so an unset
//! or malformed variable always falls back to the compiled default.
//!
//! ```ignore
//! use blkio_core::env::{env_get, env_get_bool};
//!
//! let max_reqs: usize = env_get("BLKIO_PROXY_MAX_REQS", 128);
//! let rmw = env_get_bool("BLKIO_USE_NEW_RMW", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true and
/// "0", "false", "no", "off" as false. Anything else, including unset,
/// returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.to_lowercase()) {
        Ok(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
