//! License tokens: `subject:YYYY-MM-DD:hash`.
//!
//! `hash` is the lowercase hex SHA-256 of `subject:YYYY-MM-DD:secret`, so
//! tokens minted by any tool that shares the secret verify here. Tokens are
//! stateless: there is no revocation list, so expiry is the only way a token
//! stops working. The expiry date means 00:00:00 UTC of that day; a token is
//! valid strictly before that instant.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sha2::{Digest, Sha256};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Salted hash for `subject:expiry`, hex encoded.
pub fn sign(secret: &str, subject: &str, expiry: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", subject, expiry, secret).as_bytes());
    hex::encode(hasher.finalize())
}

/// Issue a token for `subject` that expires `days` from today (UTC).
pub fn issue(secret: &str, subject: &str, days: i64) -> Result<String> {
    issue_at(secret, subject, days, Utc::now())
}

pub fn issue_at(secret: &str, subject: &str, days: i64, now: DateTime<Utc>) -> Result<String> {
    if subject.is_empty() || subject.contains(':') {
        bail!("subject must be non-empty and must not contain ':'");
    }
    if days < 1 {
        bail!("days must be >= 1");
    }
    let expiry = (now.date_naive() + Duration::days(days))
        .format(DATE_FORMAT)
        .to_string();
    Ok(format!("{}:{}:{}", subject, expiry, sign(secret, subject, &expiry)))
}

/// Check a token against the secret and the current time. Never errors:
/// malformed input is simply invalid.
pub fn is_valid(secret: &str, token: &str) -> bool {
    is_valid_at(secret, token, Utc::now())
}

pub fn is_valid_at(secret: &str, token: &str, now: DateTime<Utc>) -> bool {
    let parts: Vec<&str> = token.trim().split(':').collect();
    let [subject, expiry, provided] = parts.as_slice() else {
        return false;
    };

    let Ok(date) = NaiveDate::parse_from_str(expiry, DATE_FORMAT) else {
        return false;
    };
    let Some(expires_at) = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()) else {
        return false;
    };
    if expires_at <= now {
        return false;
    }

    constant_time_eq(provided, &sign(secret, subject, expiry))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
