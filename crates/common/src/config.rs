use std::path::PathBuf;
use std::time::Duration;

use crate::types::IdentityScope;

/// Upper bound on both the page size and the cached record count.
pub const MAX_PAGE_SIZE: usize = 120;

/// Where seen cursors are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorBackend {
    File(PathBuf),
    Redis(String),
    Memory,
}

/// Which audio cue accompanies `play_sound` notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundConfig {
    Bell,
    Command(String),
    Off,
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Backend base URL, without trailing slash
    pub api_base_url: String,

    /// Poll interval in milliseconds (default: 5000)
    pub poll_interval_ms: u64,

    /// Records requested per fetch, clamped to `1..=store_capacity`
    pub page_size: usize,

    /// Maximum number of records kept in the notification store (default: 120)
    pub store_capacity: usize,

    /// How long a toast stays visible in milliseconds (default: 4500)
    pub toast_duration_ms: u64,

    /// Maximum number of concurrently visible toasts (default: 5)
    pub toast_limit: usize,

    /// Per-request HTTP timeout in milliseconds (default: 10000)
    pub http_timeout_ms: u64,

    /// Seen-cursor persistence backend
    pub cursor_backend: CursorBackend,

    /// Key namespace for persisted cursors
    pub cursor_namespace: String,

    /// Identity active at startup
    pub identity: IdentityScope,

    /// Audio cue for `play_sound` notices
    pub sound: SoundConfig,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            poll_interval_ms: 5000,
            page_size: MAX_PAGE_SIZE,
            store_capacity: MAX_PAGE_SIZE,
            toast_duration_ms: 4500,
            toast_limit: 5,
            http_timeout_ms: 10_000,
            cursor_backend: CursorBackend::File(PathBuf::from(".bulletin/seen.json")),
            cursor_namespace: "bulletin:seen".to_string(),
            identity: IdentityScope::Guest,
            sound: SoundConfig::Bell,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let store_capacity = parse_or(&lookup, "BULLETIN_STORE_CAPACITY", defaults.store_capacity)?;
        if store_capacity == 0 {
            anyhow::bail!("BULLETIN_STORE_CAPACITY must be greater than zero");
        }
        let requested_page = parse_or(&lookup, "BULLETIN_PAGE_SIZE", defaults.page_size)?;
        let page_size = requested_page.clamp(1, store_capacity);
        if page_size != requested_page {
            tracing::warn!(
                requested = requested_page,
                page_size,
                "BULLETIN_PAGE_SIZE out of range, clamped to store capacity"
            );
        }

        let cursor_backend = match lookup("BULLETIN_CURSOR_BACKEND")
            .as_deref()
            .map(str::trim)
            .unwrap_or("file")
        {
            "file" => CursorBackend::File(
                lookup("BULLETIN_CURSOR_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".bulletin/seen.json")),
            ),
            "redis" => CursorBackend::Redis(
                lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            ),
            "memory" => CursorBackend::Memory,
            other => anyhow::bail!(
                "BULLETIN_CURSOR_BACKEND must be one of file, redis, memory (got {other:?})"
            ),
        };

        let sound = match lookup("BULLETIN_SOUND").as_deref().map(str::trim).unwrap_or("bell") {
            "bell" => SoundConfig::Bell,
            "off" => SoundConfig::Off,
            "command" => SoundConfig::Command(lookup("BULLETIN_SOUND_COMMAND").ok_or_else(
                || anyhow::anyhow!("BULLETIN_SOUND_COMMAND is required when BULLETIN_SOUND=command"),
            )?),
            other => anyhow::bail!("BULLETIN_SOUND must be one of bell, command, off (got {other:?})"),
        };

        Ok(Self {
            api_base_url: lookup("BULLETIN_API_BASE_URL")
                .unwrap_or(defaults.api_base_url)
                .trim_end_matches('/')
                .to_string(),
            poll_interval_ms: parse_or(&lookup, "BULLETIN_POLL_INTERVAL_MS", defaults.poll_interval_ms)?
                .max(1),
            page_size,
            store_capacity,
            toast_duration_ms: parse_or(&lookup, "BULLETIN_TOAST_DURATION_MS", defaults.toast_duration_ms)?,
            toast_limit: parse_or(&lookup, "BULLETIN_TOAST_LIMIT", defaults.toast_limit)?.max(1),
            http_timeout_ms: parse_or(&lookup, "BULLETIN_HTTP_TIMEOUT_MS", defaults.http_timeout_ms)?,
            cursor_backend,
            cursor_namespace: lookup("BULLETIN_CURSOR_NAMESPACE").unwrap_or(defaults.cursor_namespace),
            identity: IdentityScope::from_identifier(lookup("BULLETIN_IDENTITY").as_deref()),
            sound,
            log_json: matches!(
                lookup("BULLETIN_LOG_JSON").as_deref(),
                Some("1") | Some("true")
            ),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}
