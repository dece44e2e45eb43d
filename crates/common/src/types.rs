use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How a notice is presented once delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryType {
    /// Transient banner, auto-dismissed.
    #[default]
    Toast,
    /// Blocking dialog, requires explicit dismissal.
    Alert,
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryType::Toast => write!(f, "toast"),
            DeliveryType::Alert => write!(f, "alert"),
        }
    }
}

/// An operator-issued notice as returned by the listing endpoint.
///
/// Records are immutable once issued; `id` is assigned by the server and is
/// strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub title: String,
    pub content: String,
    #[serde(rename = "notice_type", default)]
    pub delivery_type: DeliveryType,
    #[serde(default)]
    pub play_sound: bool,
    pub created_by: String,
    /// Unix seconds.
    #[serde(rename = "created_ts")]
    pub created_at: i64,
}

impl NotificationRecord {
    /// Creation time as a UTC timestamp, falling back to the epoch for
    /// out-of-range values.
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Identity the seen cursor is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityScope {
    /// Unauthenticated session.
    #[default]
    Guest,
    /// Authenticated user, keyed by a stable identifier.
    User(String),
}

impl IdentityScope {
    /// Build a scope from an optional identifier; blank identifiers are guests.
    pub fn from_identifier(identifier: Option<&str>) -> Self {
        match identifier.map(str::trim) {
            Some(id) if !id.is_empty() => IdentityScope::User(id.to_string()),
            _ => IdentityScope::Guest,
        }
    }

    /// Suffix used in the persisted cursor key.
    pub fn key_suffix(&self) -> &str {
        match self {
            IdentityScope::Guest => "guest",
            IdentityScope::User(id) => id,
        }
    }

    /// Fully qualified storage key, `<namespace>:<user-or-guest>`.
    pub fn storage_key(&self, namespace: &str) -> String {
        format!("{}:{}", namespace, self.key_suffix())
    }
}

impl std::fmt::Display for IdentityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_suffix())
    }
}

/// Derived unread/total figures for the history badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCounts {
    pub unread: usize,
    pub total: usize,
}
