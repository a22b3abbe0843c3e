//! Session lease records.
//!
//! A session is a time-bounded exclusive lease on a stream. The in-memory
//! backend keeps records in its session table; the file backend serializes
//! one record as JSON into the stream's `lock.json`. Either way the record
//! carries only the session id and the expiry instant. Expiry is the sole
//! recovery mechanism; there is no renewal.

use std::time::Duration;

use rill_types::SessionId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The active-session record for one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.into(),
            expires_at,
        }
    }

    /// A record leased from `now` for `lease`.
    pub fn leased(session_id: impl Into<String>, now: OffsetDateTime, lease: Duration) -> Self {
        Self::new(session_id, now + lease)
    }

    /// An expired lease is treated as absent by the next acquirer.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Whether this record is the live lease for the given session id.
    pub fn authorizes(&self, session_id: &SessionId, now: OffsetDateTime) -> bool {
        self.session_id == session_id.as_str() && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn leased_record_expires_after_lease() {
        let now = instant(1_000);
        let rec = SessionRecord::leased("s-1", now, Duration::from_secs(60));
        assert!(!rec.is_expired(now));
        assert!(!rec.is_expired(instant(1_059)));
        assert!(rec.is_expired(instant(1_060)));
        assert!(rec.is_expired(instant(2_000)));
    }

    #[test]
    fn authorizes_matching_live_session() {
        let now = instant(1_000);
        let rec = SessionRecord::leased("s-1", now, Duration::from_secs(60));
        let mine = SessionId::new("s-1").unwrap();
        let other = SessionId::new("s-2").unwrap();

        assert!(rec.authorizes(&mine, now));
        assert!(!rec.authorizes(&other, now));
        assert!(!rec.authorizes(&mine, instant(1_060)));
    }

    #[test]
    fn json_uses_rfc3339_expiry() {
        let rec = SessionRecord::new("s-1", instant(1_700_000_000));
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"session_id\":\"s-1\""));
        assert!(json.contains("2023-11-14T22:13:20Z"));

        let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rec);
    }
}
