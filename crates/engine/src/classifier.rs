//! Turns unseen records into ordered delivery actions.
//!
//! Pure: the caller applies the actions and advances the cursor.

use std::collections::BTreeMap;

use bulletin_common::types::{DeliveryType, NotificationRecord};

/// One concrete effect of delivering a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    PlaySound(NotificationRecord),
    ShowToast(NotificationRecord),
    EnqueueAlert(NotificationRecord),
}

impl DeliveryAction {
    pub fn record(&self) -> &NotificationRecord {
        match self {
            DeliveryAction::PlaySound(r)
            | DeliveryAction::ShowToast(r)
            | DeliveryAction::EnqueueAlert(r) => r,
        }
    }
}

/// Actions for one batch, plus where the cursor should move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub actions: Vec<DeliveryAction>,
    /// Number of distinct records delivered.
    pub delivered: usize,
    /// `max(cursor, max(unseen ids))`.
    pub next_cursor: u64,
}

/// Classify every record in `batch` with an id strictly above `cursor`.
///
/// Records are deduplicated by id and processed in ascending id order. For
/// each one the sound cue (if requested) precedes its toast/alert action.
pub fn classify(batch: &[NotificationRecord], cursor: u64) -> DeliveryPlan {
    let unseen: BTreeMap<u64, &NotificationRecord> = batch
        .iter()
        .filter(|r| r.id > cursor)
        .map(|r| (r.id, r))
        .collect();

    let mut actions = Vec::with_capacity(unseen.len() * 2);
    for record in unseen.values() {
        if record.play_sound {
            actions.push(DeliveryAction::PlaySound((*record).clone()));
        }
        actions.push(match record.delivery_type {
            DeliveryType::Toast => DeliveryAction::ShowToast((*record).clone()),
            DeliveryType::Alert => DeliveryAction::EnqueueAlert((*record).clone()),
        });
    }

    DeliveryPlan {
        actions,
        delivered: unseen.len(),
        next_cursor: unseen.keys().next_back().copied().unwrap_or(cursor).max(cursor),
    }
}
