//! One-time passcode computation (RFC 6238 over RFC 4226).

use super::TotpError;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt::Debug;

type HmacSha1 = Hmac<Sha1>;

/// Computes a one-time code for a normalized secret at a given instant.
///
/// The engine calls this with a 30 second period, 6 digits and no epoch offset.
pub trait TotpPrimitive: Send + Sync + Debug {
    fn compute_code(
        &self,
        secret: &str,
        period_seconds: u64,
        digits: u32,
        epoch_offset: i64,
        unix_time: i64,
    ) -> Result<String, TotpError>;
}

/// HMAC-SHA1 TOTP with base32 secrets, as used by authenticator apps.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha1Totp;

impl TotpPrimitive for HmacSha1Totp {
    fn compute_code(
        &self,
        secret: &str,
        period_seconds: u64,
        digits: u32,
        epoch_offset: i64,
        unix_time: i64,
    ) -> Result<String, TotpError> {
        if period_seconds == 0 {
            return Err(TotpError::Generation("period must be greater than 0".to_string()));
        }
        if !(1..=9).contains(&digits) {
            return Err(TotpError::Generation(format!(
                "unsupported digit count {}",
                digits
            )));
        }
        if unix_time < epoch_offset {
            return Err(TotpError::Generation("time precedes epoch offset".to_string()));
        }

        let key = BASE32_NOPAD
            .decode(secret.as_bytes())
            .map_err(|e| TotpError::Generation(format!("secret is not valid base32: {}", e)))?;
        if key.is_empty() {
            return Err(TotpError::Generation("secret is empty".to_string()));
        }

        let counter = (unix_time - epoch_offset) as u64 / period_seconds;

        let mut mac = HmacSha1::new_from_slice(&key)
            .map_err(|e| TotpError::Generation(e.to_string()))?;
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        // Dynamic truncation
        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            hash[offset] & 0x7f,
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]);

        let code = binary % 10u32.pow(digits);
        Ok(format!("{:0width$}", code, width = digits as usize))
    }
}
