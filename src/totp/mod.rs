//! TOTP generation with per-source reuse cooldown.
//!
//! A source that authenticates with a one-time code may only draw one code per
//! 30 second window. A second draw inside the same window fails fast with
//! [`TotpError::Cooldown`] instead of replaying the code the server has already seen.

pub mod code;

pub use code::{HmacSha1Totp, TotpPrimitive};

use crate::clock::{SharedClock, SystemClock};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Length of a code window in seconds.
pub const TOTP_PERIOD_SECONDS: u64 = 30;

/// Number of digits in a generated code.
pub const TOTP_DIGITS: u32 = 6;

/// Errors raised by TOTP generation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TotpError {
    /// A code was already issued for this source in the current window.
    #[error("TOTP code already used for this window, retry in {remaining_seconds}s")]
    Cooldown { remaining_seconds: u64 },

    /// The secret could not produce a code.
    #[error("TOTP generation failed: {0}")]
    Generation(String),
}

/// Per-source record of the last issued code.
#[derive(Clone)]
pub struct TotpState {
    pub last_code: String,
    pub window: i64,
    pub cooldown_until: DateTime<Utc>,
}

impl fmt::Debug for TotpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpState")
            .field("last_code", &"<redacted>")
            .field("window", &self.window)
            .field("cooldown_until", &self.cooldown_until)
            .finish()
    }
}

/// Strips whitespace and `=` padding and uppercases the base32 alphabet.
///
/// # Examples
///
/// ```
/// use source_refresh::totp::normalize_secret;
///
/// assert_eq!(normalize_secret(" jbsw y3dp ehpk 3pxp== "), "JBSWY3DPEHPK3PXP");
/// ```
pub fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Issues TOTP codes and tracks per-source cooldowns.
#[derive(Debug)]
pub struct TotpGenerator {
    primitive: Arc<dyn TotpPrimitive>,
    clock: SharedClock,
    states: DashMap<String, TotpState>,
}

impl Default for TotpGenerator {
    fn default() -> Self {
        Self::new(Arc::new(HmacSha1Totp), Arc::new(SystemClock))
    }
}

impl TotpGenerator {
    pub fn new(primitive: Arc<dyn TotpPrimitive>, clock: SharedClock) -> Self {
        Self {
            primitive,
            clock,
            states: DashMap::new(),
        }
    }

    /// Generates a code for `source_id`.
    ///
    /// # Arguments
    ///
    /// * `secret` - Base32 secret, normalized before use
    /// * `source_id` - Source the code is issued for
    ///
    /// # Returns
    ///
    /// The code, `TotpError::Cooldown` if a code was already issued for this source in
    /// the current window, or `TotpError::Generation` if the secret is unusable.
    /// A failed generation leaves the cooldown state untouched.
    pub fn generate(&self, secret: &str, source_id: &str) -> Result<String, TotpError> {
        let now = self.clock.now();

        match self.states.entry(source_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let cooldown_until = entry.get().cooldown_until;
                if now < cooldown_until {
                    let remaining_ms = (cooldown_until - now).num_milliseconds().max(1) as u64;
                    tracing::debug!(source_id, remaining_ms, "TOTP cooldown active");
                    return Err(TotpError::Cooldown {
                        remaining_seconds: remaining_ms.div_ceil(1000),
                    });
                }

                let state = self.issue(secret, now)?;
                entry.insert(state.clone());
                Ok(state.last_code)
            }
            Entry::Vacant(entry) => {
                let state = self.issue(secret, now)?;
                entry.insert(state.clone());
                Ok(state.last_code)
            }
        }
    }

    fn issue(&self, secret: &str, now: DateTime<Utc>) -> Result<TotpState, TotpError> {
        let normalized = normalize_secret(secret);
        if normalized.is_empty() {
            return Err(TotpError::Generation("secret is empty".to_string()));
        }

        let unix_time = now.timestamp();
        let code = self
            .primitive
            .compute_code(&normalized, TOTP_PERIOD_SECONDS, TOTP_DIGITS, 0, unix_time)?;

        let period = TOTP_PERIOD_SECONDS as i64;
        let window = unix_time.div_euclid(period);
        let cooldown_until = Utc
            .timestamp_opt((window + 1) * period, 0)
            .single()
            .ok_or_else(|| TotpError::Generation("time out of range".to_string()))?;

        Ok(TotpState {
            last_code: code,
            window,
            cooldown_until,
        })
    }

    /// Returns the current state for a source, if a code was ever issued.
    pub fn state(&self, source_id: &str) -> Option<TotpState> {
        self.states.get(source_id).map(|s| s.clone())
    }

    /// Forgets a source, e.g. when it is removed.
    pub fn clear(&self, source_id: &str) -> bool {
        self.states.remove(source_id).is_some()
    }

    /// Forgets every source. Called when the session ends.
    pub fn clear_all(&self) {
        self.states.clear();
    }
}
