// src/engine/admission.rs

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::types::OverflowBehaviour;

/// Result of offering a new run to [`Admission`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admit<T> {
    /// Below the cap: start this item now.
    Start(T),
    /// At the cap: the item was queued and will be handed out by `release`.
    Queued,
    /// The pending queue was full; this item was discarded. In `Cancel`
    /// mode this is the oldest pending item, not the one just offered.
    Dropped(T),
}

/// Bounded admission of workflow runs.
///
/// Semantics:
/// - `max_active = None` admits everything immediately.
/// - At the cap, new items wait in a FIFO of at most `max_pending` entries.
/// - When that FIFO is full:
///   - `Queue` keeps what is already queued and drops the new item;
///   - `Cancel` drops the oldest queued item and queues the new one.
/// - `release` is called when an active item finishes and hands back the
///   next pending item (already counted as active), if any.
#[derive(Debug)]
pub struct Admission<T> {
    max_active: Option<usize>,
    max_pending: usize,
    behaviour: OverflowBehaviour,
    active: usize,
    pending: VecDeque<T>,
}

impl<T> Admission<T> {
    /// `max_active` and `max_pending` are clamped to at least 1.
    pub fn new(max_active: Option<usize>, max_pending: usize, behaviour: OverflowBehaviour) -> Self {
        Self {
            max_active: max_active.map(|n| n.max(1)),
            max_pending: max_pending.max(1),
            behaviour,
            active: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.pending.is_empty()
    }

    pub fn behaviour(&self) -> OverflowBehaviour {
        self.behaviour
    }

    fn has_capacity(&self) -> bool {
        self.max_active.is_none_or(|max| self.active < max)
    }

    pub fn offer(&mut self, item: T) -> Admit<T> {
        if self.has_capacity() {
            self.active += 1;
            return Admit::Start(item);
        }

        if self.pending.len() < self.max_pending {
            self.pending.push_back(item);
            debug!(pending = self.pending.len(), "run queued at concurrency cap");
            return Admit::Queued;
        }

        match self.behaviour {
            OverflowBehaviour::Queue => {
                warn!(
                    max_pending = self.max_pending,
                    "pending queue full; dropping new run (queue mode)"
                );
                Admit::Dropped(item)
            }
            OverflowBehaviour::Cancel => {
                self.pending.push_back(item);
                warn!(
                    max_pending = self.max_pending,
                    "pending queue full; dropping oldest queued run (cancel mode)"
                );
                match self.pending.pop_front() {
                    Some(oldest) => Admit::Dropped(oldest),
                    // Unreachable: the item was just pushed.
                    None => Admit::Queued,
                }
            }
        }
    }

    /// An active item finished. Returns the next pending item to start.
    pub fn release(&mut self) -> Option<T> {
        self.active = self.active.saturating_sub(1);
        if !self.has_capacity() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.active += 1;
        Some(next)
    }

    /// Change limits, e.g. after a config reload.
    ///
    /// Returns pending items that can start under the new cap, plus items
    /// evicted because the pending queue shrank (oldest first).
    pub fn set_limits(
        &mut self,
        max_active: Option<usize>,
        max_pending: usize,
        behaviour: OverflowBehaviour,
    ) -> (Vec<T>, Vec<T>) {
        self.max_active = max_active.map(|n| n.max(1));
        self.max_pending = max_pending.max(1);
        self.behaviour = behaviour;

        let mut started = Vec::new();
        while self.has_capacity() {
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            self.active += 1;
            started.push(next);
        }

        let mut evicted = Vec::new();
        while self.pending.len() > self.max_pending {
            if let Some(item) = self.pending.pop_front() {
                evicted.push(item);
            }
        }

        (started, evicted)
    }

    /// Remove every pending item.
    pub fn drain_pending(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }
}
