//! Drives the [`SyncEngine`] from timers, identity changes and UI commands.
//!
//! A single task `select!`s over:
//! - the poll interval (first tick fires immediately)
//! - the outstanding fetch, the only place the sync path suspends
//! - a superseded fetch still finishing for the previous identity scope
//! - the earliest toast deadline
//! - identity changes, UI commands and an optional shutdown signal
//!
//! Ticks that land while a fetch is outstanding are skipped, not queued.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use bulletin_common::error::Result;
use bulletin_common::types::{IdentityScope, NotificationRecord};
use bulletin_engine::{FetchOutcome, FetchTicket, Observable, SyncEngine};

use crate::source::NotificationSource;

type InFlight<'a> =
    Pin<Box<dyn Future<Output = (FetchTicket, Result<Vec<NotificationRecord>>)> + 'a>>;

/// Requests from the UI to the scheduler task.
#[derive(Debug)]
pub enum Command {
    DismissAlert,
    MarkRead,
    History(oneshot::Sender<Vec<NotificationRecord>>),
    Shutdown,
}

/// Cloneable sender side used by the UI.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn dismiss_alert(&self) {
        let _ = self.tx.send(Command::DismissAlert);
    }

    pub fn mark_read(&self) {
        let _ = self.tx.send(Command::MarkRead);
    }

    /// Newest-first copy of the store, or empty if the scheduler is gone.
    pub async fn history(&self) -> Vec<NotificationRecord> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::History(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Counters reported when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub fetches_started: u64,
    pub fetches_failed: u64,
    pub ticks_skipped: u64,
    pub results_discarded: u64,
    pub delivered: u64,
}

pub struct FetchScheduler<S> {
    engine: SyncEngine,
    source: S,
    identity: Observable<IdentityScope>,
    commands: mpsc::UnboundedReceiver<Command>,
    poll_interval: Duration,
}

impl<S: NotificationSource> FetchScheduler<S> {
    pub fn new(
        engine: SyncEngine,
        source: S,
        identity: Observable<IdentityScope>,
        poll_interval: Duration,
    ) -> (Self, SchedulerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        (
            Self {
                engine,
                source,
                identity,
                commands,
                poll_interval,
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until a `Shutdown` command arrives or every handle is dropped.
    pub async fn run(self) -> SchedulerStats {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also stops when `signal` completes.
    /// Every exit path tears the engine down before returning.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> SchedulerStats {
        let Self {
            mut engine,
            source,
            identity,
            mut commands,
            poll_interval,
        } = self;
        let source = &source;

        let mut stats = SchedulerStats::default();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut scope_rx = identity.subscribe();
        // The engine may have been built for a different scope than the
        // observable currently holds.
        if engine.switch_scope(scope_rx.borrow_and_update().clone()) {
            tracing::debug!("Scheduler adopted current identity scope");
        }

        tokio::pin!(signal);
        let mut in_flight: Option<InFlight<'_>> = None;
        let mut superseded: Option<InFlight<'_>> = None;

        tracing::info!(
            scope = %engine.scope(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Fetch scheduler started"
        );

        loop {
            let toast_deadline = engine.next_toast_expiry();

            tokio::select! {
                _ = ticker.tick() => {
                    match engine.begin_fetch() {
                        Some(ticket) => {
                            stats.fetches_started += 1;
                            tracing::trace!(mode = ?ticket.request.mode, "Fetch started");
                            in_flight = Some(start_fetch(source, ticket));
                        }
                        None => {
                            stats.ticks_skipped += 1;
                            tracing::debug!("Previous fetch still in flight, skipping tick");
                        }
                    }
                }

                (ticket, result) = wait_for(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    match engine.complete_fetch(ticket, result, Instant::now()) {
                        FetchOutcome::Applied { delivered, .. } => stats.delivered += delivered as u64,
                        FetchOutcome::Failed => stats.fetches_failed += 1,
                        FetchOutcome::Stale => stats.results_discarded += 1,
                    }
                }

                (ticket, result) = wait_for(&mut superseded), if superseded.is_some() => {
                    superseded = None;
                    if engine.complete_fetch(ticket, result, Instant::now()) == FetchOutcome::Stale {
                        stats.results_discarded += 1;
                    }
                }

                _ = sleep_until(toast_deadline), if toast_deadline.is_some() => {
                    let expired = engine.expire_toasts(Instant::now());
                    tracing::trace!(expired, "Toasts expired");
                }

                changed = scope_rx.changed() => {
                    if changed.is_err() {
                        // The scheduler holds the sender, so this cannot close.
                        continue;
                    }
                    let scope = scope_rx.borrow_and_update().clone();
                    if engine.switch_scope(scope) {
                        if let Some(previous) = in_flight.take() {
                            superseded = Some(previous);
                        }
                        ticker.reset_immediately();
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(Command::DismissAlert) => {
                            if engine.dismiss_alert().is_none() {
                                tracing::debug!("Dismiss ignored, no alert showing");
                            }
                        }
                        Some(Command::MarkRead) => engine.mark_read(),
                        Some(Command::History(reply)) => {
                            let _ = reply.send(engine.history().cloned().collect());
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }

                () = &mut signal => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        engine.shutdown();
        tracing::info!(?stats, "Fetch scheduler stopped");
        stats
    }
}

fn start_fetch<'a, S: NotificationSource>(source: &'a S, ticket: FetchTicket) -> InFlight<'a> {
    Box::pin(async move {
        let result = source.fetch(ticket.request).await;
        (ticket, result)
    })
}

async fn wait_for(
    slot: &mut Option<InFlight<'_>>,
) -> (FetchTicket, Result<Vec<NotificationRecord>>) {
    match slot {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
