//! Seen-cursor persistence.
//!
//! One integer per identity scope, stored under `<namespace>:<scope>`.
//! Storage is synchronous so an advance is durable before control returns
//! to the scheduler. Every backend raises values in place and never lowers
//! them, even when several clients share the same store.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use bulletin_common::config::CursorBackend;
use bulletin_common::error::{BulletinError, Result};
use bulletin_common::types::IdentityScope;

/// Upper bound on a single Redis connect or command.
pub const REDIS_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a failed Redis connection is left alone before reconnecting.
pub const REDIS_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Key/value backend for seen cursors.
pub trait CursorStorage {
    fn load(&mut self, key: &str) -> Result<Option<u64>>;

    /// Raise the value under `key` to at least `value` and return what is
    /// stored afterwards.
    fn raise(&mut self, key: &str, value: u64) -> Result<u64>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// In-process backend. Clones share the same map, so a value written
/// through one handle survives an engine reset and can be inspected by
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStorage {
    values: Rc<RefCell<BTreeMap<String, u64>>>,
}

impl MemoryCursorStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.borrow().get(key).copied()
    }
}

impl CursorStorage for MemoryCursorStorage {
    fn load(&mut self, key: &str) -> Result<Option<u64>> {
        Ok(self.get(key))
    }

    fn raise(&mut self, key: &str, value: u64) -> Result<u64> {
        let mut values = self.values.borrow_mut();
        let stored = values.entry(key.to_string()).or_insert(value);
        *stored = (*stored).max(value);
        Ok(*stored)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// JSON file holding every scope's cursor.
///
/// Nothing is cached: every load reads the file, and every raise re-reads
/// it and merges before writing, so clients sharing the file only ever move
/// each other's cursors forward. Writes go through a per-process temp file
/// renamed into place, so a crash mid-write leaves the previous contents
/// intact.
#[derive(Debug)]
pub struct FileCursorStorage {
    path: PathBuf,
}

impl FileCursorStorage {
    /// Open (or lazily create) the cursor file at `path`.
    ///
    /// A missing file is an empty map; an unreadable or corrupt one is an
    /// error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = read_map(&path)?;
        tracing::debug!(path = %path.display(), scopes = values.len(), "Opened cursor file");
        Ok(Self { path })
    }

    fn write_map(&self, values: &BTreeMap<String, u64>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(values)?)?;
        file.sync_all()?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn read_map(path: &Path) -> Result<BTreeMap<String, u64>> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

impl CursorStorage for FileCursorStorage {
    fn load(&mut self, key: &str) -> Result<Option<u64>> {
        Ok(read_map(&self.path)?.get(key).copied())
    }

    fn raise(&mut self, key: &str, value: u64) -> Result<u64> {
        let mut values = read_map(&self.path)?;
        if let Some(&stored) = values.get(key)
            && stored >= value
        {
            return Ok(stored);
        }
        values.insert(key.to_string(), value);
        self.write_map(&values)?;
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// `GET`, then `SET` only when the new value is higher, in one atomic step.
const RAISE_SCRIPT: &str = r"
local stored = tonumber(redis.call('GET', KEYS[1]))
local wanted = tonumber(ARGV[1])
if stored and stored >= wanted then
    return stored
end
redis.call('SET', KEYS[1], ARGV[1])
return wanted
";

enum RedisOp {
    Load(String),
    Raise(String, u64),
}

struct RedisRequest {
    op: RedisOp,
    reply: std_mpsc::Sender<Result<Option<u64>>>,
}

/// Redis backend.
///
/// Commands run on a dedicated worker thread that owns a
/// [`ConnectionManager`] and its own small runtime, with every connect and
/// command bounded by a timeout. The caller blocks only until the worker
/// answers. After a failed connect the worker refuses requests until
/// [`REDIS_RETRY_BACKOFF`] has passed, so an outage costs one bounded wait
/// per backoff window rather than one per poll.
pub struct RedisCursorStorage {
    requests: std_mpsc::Sender<RedisRequest>,
    timeout: Duration,
}

impl RedisCursorStorage {
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_timeout(redis_url, REDIS_TIMEOUT)
    }

    pub fn with_timeout(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (requests, incoming) = std_mpsc::channel();
        let worker = RedisWorker {
            client,
            timeout,
            conn: None,
            retry_at: None,
            raise: redis::Script::new(RAISE_SCRIPT),
        };
        std::thread::Builder::new()
            .name("bulletin-redis".into())
            .spawn(move || worker.run(runtime, incoming))?;
        Ok(Self { requests, timeout })
    }

    fn call(&self, op: RedisOp) -> Result<Option<u64>> {
        let (reply, response) = std_mpsc::channel();
        self.requests
            .send(RedisRequest { op, reply })
            .map_err(|_| BulletinError::Storage("redis worker stopped".into()))?;
        // Connect and command are bounded separately by the worker.
        response
            .recv_timeout(self.timeout * 2 + Duration::from_millis(250))
            .map_err(|_| BulletinError::Storage("redis request timed out".into()))?
    }
}

impl CursorStorage for RedisCursorStorage {
    fn load(&mut self, key: &str) -> Result<Option<u64>> {
        self.call(RedisOp::Load(key.to_string()))
    }

    fn raise(&mut self, key: &str, value: u64) -> Result<u64> {
        let stored = self.call(RedisOp::Raise(key.to_string(), value))?;
        Ok(stored.unwrap_or(value))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

struct RedisWorker {
    client: redis::Client,
    timeout: Duration,
    conn: Option<ConnectionManager>,
    retry_at: Option<Instant>,
    raise: redis::Script,
}

impl RedisWorker {
    fn run(mut self, runtime: tokio::runtime::Runtime, incoming: std_mpsc::Receiver<RedisRequest>) {
        for request in incoming {
            let result = runtime.block_on(self.execute(request.op));
            let _ = request.reply.send(result);
        }
        tracing::debug!("Redis cursor worker stopped");
    }

    async fn connection(&mut self) -> Result<ConnectionManager> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        if let Some(retry_at) = self.retry_at
            && Instant::now() < retry_at
        {
            return Err(BulletinError::Storage(
                "redis unavailable, waiting before reconnecting".into(),
            ));
        }

        match tokio::time::timeout(self.timeout, ConnectionManager::new(self.client.clone())).await {
            Ok(Ok(conn)) => {
                tracing::info!("Connected to Redis");
                self.retry_at = None;
                self.conn = Some(conn.clone());
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.back_off(&e.to_string());
                Err(e.into())
            }
            Err(_) => {
                self.back_off("connect timed out");
                Err(BulletinError::Storage(format!(
                    "redis connect timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    async fn execute(&mut self, op: RedisOp) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let raise = &self.raise;
        let command = async {
            match op {
                RedisOp::Load(key) => {
                    let value: Option<u64> = conn.get(&key).await?;
                    Ok::<_, redis::RedisError>(value)
                }
                RedisOp::Raise(key, value) => {
                    let stored: u64 = raise.key(&key).arg(value).invoke_async(&mut conn).await?;
                    Ok(Some(stored))
                }
            }
        };
        let outcome = tokio::time::timeout(self.timeout, command).await;

        match outcome {
            Ok(result) => Ok(result?),
            Err(_) => {
                self.back_off("command timed out");
                Err(BulletinError::Storage(format!(
                    "redis command timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn back_off(&mut self, reason: &str) {
        self.conn = None;
        self.retry_at = Some(Instant::now() + REDIS_RETRY_BACKOFF);
        tracing::warn!(
            reason,
            retry_in_secs = REDIS_RETRY_BACKOFF.as_secs(),
            "Redis cursor storage unavailable"
        );
    }
}

/// Build the configured backend.
pub fn open_storage(backend: &CursorBackend) -> Result<Box<dyn CursorStorage>> {
    Ok(match backend {
        CursorBackend::File(path) => Box::new(FileCursorStorage::open(path.clone())?),
        CursorBackend::Redis(url) => Box::new(RedisCursorStorage::new(url)?),
        CursorBackend::Memory => Box::new(MemoryCursorStorage::new()),
    })
}

/// Scope-aware front over a [`CursorStorage`].
pub struct SeenCursorStore {
    storage: Box<dyn CursorStorage>,
    namespace: String,
}

impl SeenCursorStore {
    pub fn new(storage: Box<dyn CursorStorage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    /// Previously persisted cursor for `scope`, if any.
    pub fn load(&mut self, scope: &IdentityScope) -> Result<Option<u64>> {
        self.storage.load(&scope.storage_key(&self.namespace))
    }

    /// Persist `value` for `scope`.
    ///
    /// Never lowers a stored value: if the backend already holds something
    /// larger (another client of the same identity got further), that value
    /// is kept and returned.
    pub fn save(&mut self, scope: &IdentityScope, value: u64) -> Result<u64> {
        let key = scope.storage_key(&self.namespace);
        let stored = self.storage.raise(&key, value)?;
        tracing::debug!(
            key = %key,
            value = stored,
            backend = self.storage.name(),
            "Persisted seen cursor"
        );
        Ok(stored)
    }
}
