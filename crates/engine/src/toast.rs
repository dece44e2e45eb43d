//! Bounded set of toasts that expire independently.
//!
//! Each toast carries its own deadline. The scheduler sleeps until
//! [`ToastManager::next_expiry`] and then calls [`ToastManager::expire`].
//! The visible cap is a display limit only; evicting a toast has no effect
//! on delivery state.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use bulletin_common::types::NotificationRecord;

use crate::observable::Observable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub record: NotificationRecord,
    pub expires_at: Instant,
}

pub struct ToastManager {
    visible: VecDeque<Toast>,
    published: Observable<Vec<NotificationRecord>>,
    duration: Duration,
    limit: usize,
}

impl ToastManager {
    pub fn new(
        published: Observable<Vec<NotificationRecord>>,
        duration: Duration,
        limit: usize,
    ) -> Self {
        published.set(Vec::new());
        Self {
            visible: VecDeque::new(),
            published,
            duration,
            limit: limit.max(1),
        }
    }

    /// Show a toast until `now + duration`, evicting the oldest visible one
    /// if the cap is exceeded.
    pub fn push(&mut self, record: NotificationRecord, now: Instant) {
        self.visible.push_back(Toast {
            record,
            expires_at: now + self.duration,
        });
        while self.visible.len() > self.limit {
            if let Some(evicted) = self.visible.pop_front() {
                tracing::debug!(id = evicted.record.id, "Toast evicted by display cap");
            }
        }
        self.publish();
    }

    /// Remove every toast whose deadline is at or before `now`.
    /// Returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.visible.len();
        self.visible.retain(|t| t.expires_at > now);
        let removed = before - self.visible.len();
        if removed > 0 {
            self.publish();
        }
        removed
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.visible.iter().map(|t| t.expires_at).min()
    }

    /// Oldest first.
    pub fn visible(&self) -> impl Iterator<Item = &Toast> {
        self.visible.iter()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Drop every toast, cancelling their timers.
    pub fn clear(&mut self) {
        self.visible.clear();
        self.publish();
    }

    fn publish(&self) {
        self.published
            .set(self.visible.iter().map(|t| t.record.clone()).collect());
    }
}

#[cfg(test)]
mod tests {
    use bulletin_common::types::DeliveryType;

    use super::*;

    fn toast(id: u64) -> NotificationRecord {
        NotificationRecord {
            id,
            title: format!("toast {id}"),
            content: "body".into(),
            delivery_type: DeliveryType::Toast,
            play_sound: false,
            created_by: "admin".into(),
            created_at: 0,
        }
    }

    fn manager(limit: usize) -> (ToastManager, Observable<Vec<NotificationRecord>>) {
        let published = Observable::new(Vec::new());
        (
            ToastManager::new(published.clone(), Duration::from_millis(4500), limit),
            published,
        )
    }

    fn ids(published: &Observable<Vec<NotificationRecord>>) -> Vec<u64> {
        published.get().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_each_toast_expires_independently() {
        let (mut toasts, published) = manager(5);
        let t0 = Instant::now();
        toasts.push(toast(1), t0);
        toasts.push(toast(2), t0 + Duration::from_secs(2));

        assert_eq!(toasts.next_expiry(), Some(t0 + Duration::from_millis(4500)));
        assert_eq!(toasts.expire(t0 + Duration::from_millis(4499)), 0);
        assert_eq!(toasts.expire(t0 + Duration::from_millis(4500)), 1);
        assert_eq!(ids(&published), vec![2]);

        assert_eq!(toasts.expire(t0 + Duration::from_millis(6500)), 1);
        assert!(toasts.is_empty());
        assert_eq!(toasts.next_expiry(), None);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let (mut toasts, published) = manager(5);
        let now = Instant::now();
        for id in 1..=7 {
            toasts.push(toast(id), now);
        }
        assert_eq!(toasts.len(), 5);
        assert_eq!(ids(&published), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_clear_publishes_empty() {
        let (mut toasts, published) = manager(5);
        toasts.push(toast(1), Instant::now());
        toasts.clear();
        assert!(published.get().is_empty());
        assert_eq!(toasts.next_expiry(), None);
    }
}
