//! Per-transaction identifiers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::post::STAMP_FORMAT;

/// Unique identifier of one publish transaction.
///
/// `<YYYY-MM-DD-HHMM>-<8 hex digits>`. The minute stamp keeps branch names
/// and asset names readable; the random suffix keeps two publishes in the
/// same minute from colliding on a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StampId(String);

impl StampId {
    /// New stamp for `timestamp` with a random suffix.
    pub fn new(timestamp: &DateTime<Utc>) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self::with_nonce(timestamp, &nonce[..8])
    }

    /// Stamp with a caller-chosen suffix.
    pub fn with_nonce(timestamp: &DateTime<Utc>, nonce: &str) -> Self {
        Self(format!("{}-{nonce}", timestamp.format(STAMP_FORMAT)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StampId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 14, 30, 59).unwrap()
    }

    #[test]
    fn stamp_has_minute_prefix_and_nonce() {
        let stamp = StampId::new(&ts());
        let (minute, nonce) = stamp.as_str().rsplit_once('-').unwrap();
        assert_eq!(minute, "2026-10-16-1430");
        assert_eq!(nonce.len(), 8);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_minute_stamps_differ() {
        assert_ne!(StampId::new(&ts()), StampId::new(&ts()));
    }

    #[test]
    fn with_nonce_is_deterministic() {
        let stamp = StampId::with_nonce(&ts(), "0a1b2c3d");
        assert_eq!(stamp.to_string(), "2026-10-16-1430-0a1b2c3d");
    }
}
