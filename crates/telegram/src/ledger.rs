//! Which `getUpdates` updates may be confirmed to the Bot API.
//!
//! Polling with `offset = n` confirms every update below `n`, and a confirmed
//! update is never delivered again. The ledger keeps the offset at the oldest
//! update whose event has not been settled, so posts dropped by a shutdown or
//! reconnect come back on the next subscription.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use chanrelay_forward::EventHandle;

#[derive(Debug, Default)]
pub(crate) struct UpdateLedger {
    /// Bumped by every subscription; records from older pollers are ignored.
    generation: u64,
    /// Every update below this has been confirmed.
    floor: u32,
    /// Update id to whether it is settled.
    updates: BTreeMap<u32, bool>,
    unsettled: HashMap<EventHandle, u32>,
}

impl UpdateLedger {
    /// Start a new subscription and return its generation.
    ///
    /// Nothing at or above the oldest unsettled update is remembered, so
    /// everything the server sends again is emitted again.
    pub(crate) fn begin(&mut self) -> u64 {
        self.offset();
        self.updates.clear();
        self.unsettled.clear();
        self.generation += 1;
        self.generation
    }

    /// Record an update seen by subscription `generation`.
    ///
    /// `handle` is the event the update carries, or `None` for an update that
    /// is dropped on sight and so settled at once. Returns `false` for updates
    /// already recorded, already confirmed, or seen by a stale subscription.
    pub(crate) fn record(
        &mut self,
        generation: u64,
        update_id: u32,
        handle: Option<EventHandle>,
    ) -> bool {
        if generation != self.generation
            || update_id < self.floor
            || self.updates.contains_key(&update_id)
        {
            return false;
        }
        let settled = match handle {
            Some(handle) => {
                self.unsettled.insert(handle, update_id);
                false
            },
            None => true,
        };
        self.updates.insert(update_id, settled);
        true
    }

    pub(crate) fn settle(&mut self, handle: &EventHandle) {
        let update_id = self.unsettled.remove(handle);
        if let Some(settled) = update_id.and_then(|id| self.updates.get_mut(&id)) {
            *settled = true;
        }
    }

    /// Offset for the next `getUpdates`: the oldest unsettled update, or one
    /// past the newest recorded one.
    pub(crate) fn offset(&mut self) -> i32 {
        let next = self
            .updates
            .iter()
            .find(|(_, settled)| !**settled)
            .map(|(id, _)| *id)
            .or_else(|| self.updates.keys().next_back().map(|id| id.saturating_add(1)))
            .unwrap_or(self.floor);
        self.floor = self.floor.max(next);
        self.updates = self.updates.split_off(&self.floor);
        i32::try_from(self.floor).unwrap_or(i32::MAX)
    }
}

/// [`UpdateLedger`] shared by the platform and its polling task.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedLedger(Arc<Mutex<UpdateLedger>>);

impl SharedLedger {
    pub(crate) fn lock(&self) -> MutexGuard<'_, UpdateLedger> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn handle(event_id: u64) -> EventHandle {
        EventHandle {
            chat_id: -1001,
            event_id,
        }
    }

    #[test]
    fn offset_waits_for_the_oldest_unsettled_update() {
        let mut ledger = UpdateLedger::default();
        let generation = ledger.begin();
        assert!(ledger.record(generation, 10, Some(handle(5))));
        assert!(ledger.record(generation, 11, Some(handle(6))));
        assert_eq!(ledger.offset(), 10);

        ledger.settle(&handle(6));
        assert_eq!(ledger.offset(), 10);

        ledger.settle(&handle(5));
        assert_eq!(ledger.offset(), 12);
    }

    #[test]
    fn dropped_updates_are_confirmed_at_once() {
        let mut ledger = UpdateLedger::default();
        let generation = ledger.begin();
        assert!(ledger.record(generation, 3, None));
        assert!(ledger.record(generation, 4, None));
        assert_eq!(ledger.offset(), 5);
        // redelivery of a confirmed update
        assert!(!ledger.record(generation, 4, None));
    }

    #[test]
    fn known_updates_are_not_recorded_twice() {
        let mut ledger = UpdateLedger::default();
        let generation = ledger.begin();
        assert!(ledger.record(generation, 10, Some(handle(5))));
        assert_eq!(ledger.offset(), 10);
        assert!(!ledger.record(generation, 10, Some(handle(5))));
    }

    #[test]
    fn new_subscription_emits_unsettled_updates_again() {
        let mut ledger = UpdateLedger::default();
        let first = ledger.begin();
        ledger.record(first, 10, Some(handle(5)));
        ledger.record(first, 11, Some(handle(6)));
        ledger.settle(&handle(6));

        let second = ledger.begin();
        assert_eq!(ledger.offset(), 10);
        assert!(!ledger.record(first, 12, Some(handle(7))));
        assert!(ledger.record(second, 10, Some(handle(5))));
        assert!(ledger.record(second, 11, Some(handle(6))));
    }

    #[test]
    fn late_settle_of_a_forgotten_update_is_ignored() {
        let mut ledger = UpdateLedger::default();
        let first = ledger.begin();
        ledger.record(first, 10, Some(handle(5)));
        ledger.begin();
        ledger.settle(&handle(5));
        assert_eq!(ledger.offset(), 10);
    }
}
