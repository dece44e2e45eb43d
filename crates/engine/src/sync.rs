//! Synchronization engine for one identity scope at a time.
//!
//! Fetch lifecycle:
//! 1. `begin_fetch` picks snapshot or incremental mode and raises the
//!    in-flight guard (or returns `None` if a fetch is already outstanding)
//! 2. the caller performs the request; this is the only suspension point
//! 3. `complete_fetch` releases the guard, merges the batch, baselines the
//!    seen cursor on first success, delivers unseen records in ascending id
//!    order and persists the advanced cursor
//!
//! Everything here is synchronous. A ticket carries the scope generation it
//! was issued under; results for an older generation are discarded.

use std::time::Duration;

use tokio::time::Instant;

use bulletin_common::config::AppConfig;
use bulletin_common::error::BulletinError;
use bulletin_common::types::{IdentityScope, NotificationCounts, NotificationRecord};

use crate::alert_queue::AlertQueue;
use crate::classifier::{DeliveryAction, classify};
use crate::cursor::SeenCursorStore;
use crate::observable::Observable;
use crate::sound::SoundCue;
use crate::store::{MergeOutcome, NotificationStore};
use crate::toast::ToastManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Most recent page, no lower bound.
    Snapshot,
    /// Only ids strictly greater than `after_id`.
    Incremental { after_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub mode: FetchMode,
    pub limit: usize,
}

/// Proof that a fetch was started, tied to the scope it was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    pub request: FetchRequest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchState {
    /// Highest id ever observed from the server for this scope.
    pub last_fetched_id: u64,
    pub in_flight: bool,
    /// Whether the seen cursor has been baselined for this scope.
    pub initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied {
        merge: MergeOutcome,
        delivered: usize,
        cursor: u64,
        baselined: bool,
    },
    /// Transport/decode failure or cursor storage unavailable; nothing
    /// changed except releasing the guard.
    Failed,
    /// Response for a scope that is no longer active.
    Stale,
}

/// Tunables taken from [`AppConfig`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub page_size: usize,
    pub store_capacity: usize,
    pub toast_duration: Duration,
    pub toast_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            page_size: config.page_size.clamp(1, config.store_capacity.max(1)),
            store_capacity: config.store_capacity,
            toast_duration: config.toast_duration(),
            toast_limit: config.toast_limit,
        }
    }
}

/// Values the UI observes.
#[derive(Debug, Clone, Default)]
pub struct EngineOutputs {
    pub active_alert: Observable<Option<NotificationRecord>>,
    pub toasts: Observable<Vec<NotificationRecord>>,
    pub counts: Observable<NotificationCounts>,
}

pub struct SyncEngine {
    scope: IdentityScope,
    generation: u64,
    fetch: FetchState,
    store: NotificationStore,
    cursor: Option<u64>,
    read_mark: u64,
    cursors: SeenCursorStore,
    sound: Box<dyn SoundCue>,
    alerts: AlertQueue,
    toasts: ToastManager,
    outputs: EngineOutputs,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(
        scope: IdentityScope,
        cursors: SeenCursorStore,
        sound: Box<dyn SoundCue>,
        settings: EngineSettings,
        outputs: EngineOutputs,
    ) -> Self {
        let engine = Self {
            scope,
            generation: 0,
            fetch: FetchState::default(),
            store: NotificationStore::new(settings.store_capacity),
            cursor: None,
            read_mark: 0,
            cursors,
            sound,
            alerts: AlertQueue::new(outputs.active_alert.clone()),
            toasts: ToastManager::new(
                outputs.toasts.clone(),
                settings.toast_duration,
                settings.toast_limit,
            ),
            outputs,
            settings,
        };
        engine.publish_counts();
        engine
    }

    /// Start a fetch unless one is already outstanding.
    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        if self.fetch.in_flight {
            return None;
        }
        self.fetch.in_flight = true;

        let mode = match self.fetch.last_fetched_id {
            0 => FetchMode::Snapshot,
            after_id => FetchMode::Incremental { after_id },
        };
        Some(FetchTicket {
            generation: self.generation,
            request: FetchRequest {
                mode,
                limit: self.settings.page_size,
            },
        })
    }

    /// Apply the result of the fetch identified by `ticket`.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<NotificationRecord>, BulletinError>,
        now: Instant,
    ) -> FetchOutcome {
        if ticket.generation != self.generation {
            tracing::debug!(
                scope = %self.scope,
                "Discarding fetch result issued for a previous scope"
            );
            return FetchOutcome::Stale;
        }
        self.fetch.in_flight = false;

        let batch = match result {
            Ok(batch) => batch,
            Err(e) if e.is_fetch_failure() => {
                tracing::debug!(scope = %self.scope, error = %e, "Notification fetch failed, retrying next tick");
                return FetchOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(scope = %self.scope, error = %e, "Notification source error, retrying next tick");
                return FetchOutcome::Failed;
            }
        };

        // Resolve the cursor before touching the store so a storage outage
        // leaves the cycle retryable.
        let existing = self.cursor;
        let baselined = existing.is_none();
        let cursor = match existing {
            Some(cursor) => cursor,
            None => match self.baseline(&batch) {
                Ok(cursor) => cursor,
                Err(e) => {
                    tracing::warn!(scope = %self.scope, error = %e, "Seen cursor unavailable, skipping cycle");
                    return FetchOutcome::Failed;
                }
            },
        };

        let merge = self.store.merge(&batch);
        if let Some(max_id) = merge.batch_max_id {
            self.fetch.last_fetched_id = self.fetch.last_fetched_id.max(max_id);
        }
        self.fetch.initialized = true;

        let plan = classify(&batch, cursor);
        for action in plan.actions {
            self.apply(action, now);
        }
        let cursor = if plan.next_cursor > cursor {
            self.advance_cursor(plan.next_cursor)
        } else {
            cursor
        };

        self.publish_counts();

        if plan.delivered > 0 || merge.inserted > 0 {
            tracing::info!(
                scope = %self.scope,
                inserted = merge.inserted,
                delivered = plan.delivered,
                cursor,
                "Notifications synchronized"
            );
        }

        FetchOutcome::Applied {
            merge,
            delivered: plan.delivered,
            cursor,
            baselined,
        }
    }

    /// Activate `scope`, discarding everything held for the previous one.
    /// Returns `false` if `scope` is already active.
    pub fn switch_scope(&mut self, scope: IdentityScope) -> bool {
        if scope == self.scope {
            return false;
        }
        tracing::info!(from = %self.scope, to = %scope, "Identity scope changed");

        self.scope = scope;
        self.generation += 1;
        self.fetch = FetchState::default();
        self.store = NotificationStore::new(self.settings.store_capacity);
        self.cursor = None;
        self.read_mark = 0;
        self.alerts.clear();
        self.toasts.clear();
        self.publish_counts();
        true
    }

    pub fn dismiss_alert(&mut self) -> Option<NotificationRecord> {
        self.alerts.dismiss()
    }

    pub fn expire_toasts(&mut self, now: Instant) -> usize {
        self.toasts.expire(now)
    }

    pub fn next_toast_expiry(&self) -> Option<Instant> {
        self.toasts.next_expiry()
    }

    /// Mark every stored record as read for the unread badge.
    pub fn mark_read(&mut self) {
        if let Some(max_id) = self.store.max_id() {
            self.read_mark = self.read_mark.max(max_id);
        }
        self.publish_counts();
    }

    /// Clear presentation state (toast timers, alert queue) on teardown.
    pub fn shutdown(&mut self) {
        self.alerts.clear();
        self.toasts.clear();
    }

    /// Stored records, newest first.
    pub fn history(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.store.iter()
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub fn counts(&self) -> NotificationCounts {
        NotificationCounts {
            unread: self.store.count_above(self.read_mark),
            total: self.store.len(),
        }
    }

    pub fn scope(&self) -> &IdentityScope {
        &self.scope
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch
    }

    pub fn seen_cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn alerts(&self) -> &AlertQueue {
        &self.alerts
    }

    pub fn toasts(&self) -> &ToastManager {
        &self.toasts
    }

    pub fn outputs(&self) -> &EngineOutputs {
        &self.outputs
    }

    /// Establish the cursor on the first successful fetch of a scope: keep a
    /// persisted value, otherwise suppress history by starting at the newest
    /// id in this snapshot.
    fn baseline(&mut self, batch: &[NotificationRecord]) -> Result<u64, BulletinError> {
        let cursor = match self.cursors.load(&self.scope)? {
            Some(persisted) => {
                tracing::info!(scope = %self.scope, cursor = persisted, "Resuming from persisted seen cursor");
                persisted
            }
            None => {
                let baseline = batch.iter().map(|r| r.id).max().unwrap_or(0);
                tracing::info!(
                    scope = %self.scope,
                    cursor = baseline,
                    skipped = batch.len(),
                    "No seen cursor for scope, baselining without replay"
                );
                match self.cursors.save(&self.scope, baseline) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!(scope = %self.scope, error = %e, "Failed to persist baseline cursor");
                        baseline
                    }
                }
            }
        };
        self.cursor = Some(cursor);
        self.read_mark = cursor;
        Ok(cursor)
    }

    fn advance_cursor(&mut self, next: u64) -> u64 {
        let next = match self.cursors.save(&self.scope, next) {
            Ok(stored) => stored.max(next),
            Err(e) => {
                tracing::warn!(scope = %self.scope, cursor = next, error = %e, "Failed to persist seen cursor");
                next
            }
        };
        self.cursor = Some(next);
        next
    }

    fn apply(&mut self, action: DeliveryAction, now: Instant) {
        match action {
            DeliveryAction::PlaySound(record) => {
                if let Err(e) = self.sound.play(&record) {
                    tracing::debug!(id = record.id, error = %e, "Sound cue failed");
                }
            }
            DeliveryAction::ShowToast(record) => {
                tracing::info!(id = record.id, title = %record.title, "Toast delivered");
                self.toasts.push(record, now);
            }
            DeliveryAction::EnqueueAlert(record) => {
                tracing::info!(id = record.id, title = %record.title, "Alert delivered");
                self.alerts.enqueue(record);
            }
        }
    }

    fn publish_counts(&self) {
        self.outputs.counts.set_if_changed(self.counts());
    }
}

#[cfg(test)]
mod tests {
    use bulletin_common::types::DeliveryType;

    use super::*;
    use crate::cursor::MemoryCursorStorage;
    use crate::sound::Silent;

    fn record(id: u64) -> NotificationRecord {
        NotificationRecord {
            id,
            title: format!("notice {id}"),
            content: "body".into(),
            delivery_type: DeliveryType::Toast,
            play_sound: false,
            created_by: "admin".into(),
            created_at: 0,
        }
    }

    fn engine(storage: &MemoryCursorStorage) -> SyncEngine {
        SyncEngine::new(
            IdentityScope::Guest,
            SeenCursorStore::new(Box::new(storage.clone()), "ns"),
            Box::new(Silent),
            EngineSettings::default(),
            EngineOutputs::default(),
        )
    }

    #[test]
    fn test_begin_fetch_is_single_flight() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let ticket = engine.begin_fetch().unwrap();
        assert_eq!(ticket.request.mode, FetchMode::Snapshot);
        assert_eq!(ticket.request.limit, 120);
        assert!(engine.begin_fetch().is_none());
        assert!(engine.fetch_state().in_flight);
    }

    #[test]
    fn test_failure_releases_guard_without_mutation() {
        let storage = MemoryCursorStorage::new();
        let mut engine = engine(&storage);
        let ticket = engine.begin_fetch().unwrap();
        let err = BulletinError::Status {
            status: 503,
            url: "http://backend".into(),
        };
        assert_eq!(
            engine.complete_fetch(ticket, Err(err), Instant::now()),
            FetchOutcome::Failed
        );
        assert_eq!(engine.fetch_state(), FetchState::default());
        assert_eq!(engine.seen_cursor(), None);
        assert_eq!(storage.get("ns:guest"), None);
        assert!(engine.begin_fetch().is_some());
    }

    #[test]
    fn test_non_transport_source_error_is_also_retried() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let ticket = engine.begin_fetch().unwrap();
        let err = BulletinError::Storage("source cache unavailable".into());
        assert!(!err.is_fetch_failure());
        assert_eq!(
            engine.complete_fetch(ticket, Err(err), Instant::now()),
            FetchOutcome::Failed
        );
        assert!(!engine.fetch_state().in_flight);
        assert_eq!(engine.begin_fetch().unwrap().request.mode, FetchMode::Snapshot);
    }

    #[test]
    fn test_incremental_after_first_success() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let ticket = engine.begin_fetch().unwrap();
        engine.complete_fetch(ticket, Ok(vec![record(2), record(1)]), Instant::now());
        let ticket = engine.begin_fetch().unwrap();
        assert_eq!(ticket.request.mode, FetchMode::Incremental { after_id: 2 });
    }

    #[test]
    fn test_empty_snapshot_baselines_at_zero_and_stays_snapshot() {
        let storage = MemoryCursorStorage::new();
        let mut engine = engine(&storage);
        let ticket = engine.begin_fetch().unwrap();
        let outcome = engine.complete_fetch(ticket, Ok(vec![]), Instant::now());
        assert!(matches!(outcome, FetchOutcome::Applied { cursor: 0, baselined: true, .. }));
        assert_eq!(storage.get("ns:guest"), Some(0));
        assert!(engine.fetch_state().initialized);

        let ticket = engine.begin_fetch().unwrap();
        assert_eq!(ticket.request.mode, FetchMode::Snapshot);
        let outcome = engine.complete_fetch(ticket, Ok(vec![record(1)]), Instant::now());
        assert!(matches!(outcome, FetchOutcome::Applied { delivered: 1, cursor: 1, .. }));
    }

    #[test]
    fn test_stale_ticket_is_discarded() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let stale = engine.begin_fetch().unwrap();
        assert!(engine.switch_scope(IdentityScope::User("alice".into())));

        let fresh = engine.begin_fetch().unwrap();
        assert_eq!(
            engine.complete_fetch(stale, Ok(vec![record(1)]), Instant::now()),
            FetchOutcome::Stale
        );
        // The new scope's guard is untouched by the stale completion.
        assert!(engine.fetch_state().in_flight);
        assert!(engine.store().is_empty());

        let outcome = engine.complete_fetch(fresh, Ok(vec![record(3)]), Instant::now());
        assert!(matches!(outcome, FetchOutcome::Applied { .. }));
    }

    #[test]
    fn test_switch_to_same_scope_is_noop() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let ticket = engine.begin_fetch().unwrap();
        assert!(!engine.switch_scope(IdentityScope::Guest));
        assert!(matches!(
            engine.complete_fetch(ticket, Ok(vec![]), Instant::now()),
            FetchOutcome::Applied { .. }
        ));
    }

    #[test]
    fn test_counts_and_mark_read() {
        let mut engine = engine(&MemoryCursorStorage::new());
        let ticket = engine.begin_fetch().unwrap();
        engine.complete_fetch(ticket, Ok(vec![record(1), record(2)]), Instant::now());
        assert_eq!(engine.counts(), NotificationCounts { unread: 0, total: 2 });

        let ticket = engine.begin_fetch().unwrap();
        engine.complete_fetch(ticket, Ok(vec![record(3), record(4)]), Instant::now());
        assert_eq!(engine.outputs().counts.get(), NotificationCounts { unread: 2, total: 4 });

        engine.mark_read();
        assert_eq!(engine.outputs().counts.get(), NotificationCounts { unread: 0, total: 4 });
    }
}
