//! Per-slot binding state and the cancellation guard for recycled slots.
//!
//! Each slot carries a monotonically increasing generation. A decode task
//! captures `(slot, generation)` at issue time; its completion applies only
//! if the slot's generation still matches, which is how a superseded decode
//! is kept away from a recycled slot without weak references. Within one
//! slot the most recent request is therefore always authoritative.

use tracing::trace;

use crate::grid::decode::CancelToken;
use crate::store::ImageId;

/// Capture of a slot's identity at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTicket {
    pub slot: usize,
    pub generation: u64,
}

/// What a content request resolved to.
#[derive(Debug)]
pub enum RequestOutcome {
    /// A decode for this exact id is already in flight on this slot; no new
    /// task is needed and the existing one stays authoritative.
    InFlight(SlotTicket),
    /// A new decode task should be spawned with this ticket and token.
    Spawn(SlotTicket, CancelToken),
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    pending: Option<PendingDecode>,
    bound: Option<ImageId>,
}

#[derive(Debug)]
struct PendingDecode {
    id: ImageId,
    cancel: CancelToken,
}

/// The grid's view-slot arena. Foreground-only; workers never touch it.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_slot(&mut self, slot: usize) {
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, Slot::default);
        }
    }

    /// Registers a content request for `slot`. A pending task targeting a
    /// different id is cancelled; its later completion will fail the
    /// generation check and leave the slot alone.
    pub fn request(&mut self, slot: usize, id: &ImageId) -> RequestOutcome {
        self.ensure_slot(slot);
        let state = &mut self.slots[slot];

        if let Some(pending) = &state.pending {
            if pending.id == *id {
                return RequestOutcome::InFlight(SlotTicket {
                    slot,
                    generation: state.generation,
                });
            }
            trace!(slot, old = %pending.id, new = %id, "cancelling superseded decode");
            pending.cancel.cancel();
        }

        state.generation += 1;
        let cancel = CancelToken::new();
        state.pending = Some(PendingDecode {
            id: id.clone(),
            cancel: cancel.clone(),
        });
        state.bound = None;

        RequestOutcome::Spawn(
            SlotTicket {
                slot,
                generation: state.generation,
            },
            cancel,
        )
    }

    /// Binds `slot` to `id` without a task, for cache hits. Any pending
    /// decode for a different id is cancelled and superseded.
    pub fn bind_direct(&mut self, slot: usize, id: &ImageId) {
        self.ensure_slot(slot);
        let state = &mut self.slots[slot];

        if let Some(pending) = state.pending.take() {
            if pending.id != *id {
                pending.cancel.cancel();
            }
        }
        state.generation += 1;
        state.bound = Some(id.clone());
    }

    /// Applies a task completion. Returns true and transitions to `Bound`
    /// only if the slot still exists and its generation matches the ticket;
    /// anything else is a stale completion and a silent no-op.
    pub fn complete(&mut self, ticket: SlotTicket, id: &ImageId) -> bool {
        let Some(state) = self.slots.get_mut(ticket.slot) else {
            return false;
        };
        if state.generation != ticket.generation {
            return false;
        }
        state.pending = None;
        state.bound = Some(id.clone());
        true
    }

    /// The id currently bound to `slot`, if any.
    pub fn bound(&self, slot: usize) -> Option<&ImageId> {
        self.slots.get(slot).and_then(|s| s.bound.as_ref())
    }

    /// True if a decode is in flight for `slot`.
    pub fn is_pending(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.pending.is_some())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
