//! Discrete-event scheduler.
//!
//! Actions are kept in a min-heap ordered by `(tick, priority, seq)`. Every
//! scheduled action gets its own [`ActionHandle`]; cancelling removes the
//! action from the live set and leaves its heap key to be skipped on pop.

use crate::time::Tick;
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

/// Ordering of actions that fall on the same tick (earliest variant first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    ParameterRefresh,
    Reinitialize,
    Bookkeeping,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionHandle(u64);

struct Action<E> {
    event: E,
    interval: Option<Tick>,
}

type Key = (Tick, Priority, u64, u64);

pub struct Scheduler<E> {
    now: Tick,
    end: Option<Tick>,
    n_seq: u64,
    n_handles: u64,
    heap: BinaryHeap<Reverse<Key>>,
    live: HashMap<ActionHandle, Action<E>>,
}

impl<E: Clone> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: 0,
            end: None,
            n_seq: 0,
            n_handles: 0,
            heap: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    pub fn current_tick(&self) -> Tick {
        self.now
    }

    /// Stop handing out actions scheduled after `tick`.
    pub fn end_at(&mut self, tick: Tick) {
        self.end = Some(tick);
    }

    /// Schedule `event` to fire once, `delay` ticks from now.
    pub fn schedule_once(&mut self, delay: Tick, priority: Priority, event: E) -> ActionHandle {
        self.insert(delay, None, priority, event)
    }

    /// Schedule `event` to fire `first_delay` ticks from now and then every `interval` ticks.
    pub fn schedule_recurring(
        &mut self,
        first_delay: Tick,
        interval: Tick,
        priority: Priority,
        event: E,
    ) -> ActionHandle {
        self.insert(first_delay, Some(interval.max(1)), priority, event)
    }

    /// Cancel a scheduled action.
    ///
    /// Returns whether the action was still live. Cancelling an action that
    /// already fired or was already cancelled does nothing.
    pub fn cancel(&mut self, handle: ActionHandle) -> bool {
        self.live.remove(&handle).is_some()
    }

    pub fn is_live(&self, handle: ActionHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn n_live(&self) -> usize {
        self.live.len()
    }

    /// Pop the next live action, advancing the clock to its tick.
    ///
    /// Recurring actions are re-armed under the same handle before returning.
    pub fn next_event(&mut self) -> Option<E> {
        loop {
            let &Reverse((tick, priority, _, id)) = self.heap.peek()?;
            if self.end.is_some_and(|end| tick > end) {
                return None;
            }
            self.heap.pop();

            let handle = ActionHandle(id);
            let Some(action) = self.live.get(&handle) else {
                continue;
            };

            let event = action.event.clone();
            let interval = action.interval;

            self.now = tick;
            match interval {
                Some(interval) => {
                    let key = self.key(tick.saturating_add(interval), priority, handle);
                    self.heap.push(Reverse(key));
                }
                None => {
                    self.live.remove(&handle);
                }
            }
            return Some(event);
        }
    }

    fn insert(
        &mut self,
        delay: Tick,
        interval: Option<Tick>,
        priority: Priority,
        event: E,
    ) -> ActionHandle {
        let handle = ActionHandle(self.n_handles);
        self.n_handles += 1;

        let key = self.key(self.now.saturating_add(delay), priority, handle);
        self.heap.push(Reverse(key));
        self.live.insert(
            handle,
            Action { event, interval },
        );
        handle
    }

    fn key(&mut self, tick: Tick, priority: Priority, handle: ActionHandle) -> Key {
        let seq = self.n_seq;
        self.n_seq += 1;
        (tick, priority, seq, handle.0)
    }
}

impl<E: Clone> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}
