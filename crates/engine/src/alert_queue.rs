//! Serializes blocking alerts so only one is shown at a time.
//!
//! `Idle` ⇄ `Showing`. Enqueue appends and promotes the head when idle;
//! dismiss discards the active alert and promotes the next one. The active
//! alert is published through an [`Observable`] so the UI can render it.

use std::collections::VecDeque;

use bulletin_common::types::NotificationRecord;

use crate::observable::Observable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Showing,
}

pub struct AlertQueue {
    active: Observable<Option<NotificationRecord>>,
    pending: VecDeque<NotificationRecord>,
}

impl AlertQueue {
    pub fn new(active: Observable<Option<NotificationRecord>>) -> Self {
        active.set(None);
        Self {
            active,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> AlertState {
        if self.active.get().is_some() {
            AlertState::Showing
        } else {
            AlertState::Idle
        }
    }

    /// Append to the tail; shows it immediately if nothing is showing.
    pub fn enqueue(&mut self, record: NotificationRecord) {
        tracing::debug!(id = record.id, pending = self.pending.len(), "Alert enqueued");
        self.pending.push_back(record);
        if self.state() == AlertState::Idle {
            self.promote();
        }
    }

    /// Dismiss the active alert and show the next pending one, if any.
    ///
    /// Returns the dismissed record, or `None` when idle (a no-op).
    pub fn dismiss(&mut self) -> Option<NotificationRecord> {
        let dismissed = self.active.get()?;
        self.active.set(None);
        tracing::debug!(id = dismissed.id, remaining = self.pending.len(), "Alert dismissed");
        self.promote();
        Some(dismissed)
    }

    pub fn active(&self) -> Option<NotificationRecord> {
        self.active.get()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop the active and pending alerts.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.active.set(None);
    }

    fn promote(&mut self) {
        if let Some(next) = self.pending.pop_front() {
            self.active.set(Some(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use bulletin_common::types::DeliveryType;

    use super::*;

    fn alert(id: u64) -> NotificationRecord {
        NotificationRecord {
            id,
            title: format!("alert {id}"),
            content: "body".into(),
            delivery_type: DeliveryType::Alert,
            play_sound: false,
            created_by: "admin".into(),
            created_at: 0,
        }
    }

    fn queue() -> AlertQueue {
        AlertQueue::new(Observable::new(None))
    }

    #[test]
    fn test_enqueue_when_idle_shows_immediately() {
        let mut q = queue();
        assert_eq!(q.state(), AlertState::Idle);
        q.enqueue(alert(5));
        assert_eq!(q.state(), AlertState::Showing);
        assert_eq!(q.active().unwrap().id, 5);
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_fifo_one_at_a_time() {
        let mut q = queue();
        q.enqueue(alert(5));
        q.enqueue(alert(6));
        assert_eq!(q.active().unwrap().id, 5);
        assert_eq!(q.pending_len(), 1);

        assert_eq!(q.dismiss().unwrap().id, 5);
        assert_eq!(q.active().unwrap().id, 6);

        assert_eq!(q.dismiss().unwrap().id, 6);
        assert_eq!(q.state(), AlertState::Idle);
    }

    #[test]
    fn test_dismiss_when_idle_is_noop() {
        let mut q = queue();
        assert!(q.dismiss().is_none());
        assert_eq!(q.state(), AlertState::Idle);
    }

    #[test]
    fn test_identical_alerts_are_not_coalesced() {
        let mut q = queue();
        q.enqueue(alert(1));
        q.enqueue(alert(2));
        q.enqueue(alert(3));
        let mut seen = Vec::new();
        while let Some(r) = q.dismiss() {
            seen.push(r.id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_observable_tracks_active() {
        let active = Observable::new(None);
        let mut rx = active.subscribe();
        let mut q = AlertQueue::new(active.clone());
        q.enqueue(alert(9));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|r| r.id), Some(9));
        q.clear();
        assert_eq!(active.get(), None);
    }
}
