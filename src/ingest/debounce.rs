//! Per-sender coalescing of bursts.
//!
//! People often send several short messages in a row. Each sender gets at
//! most one pending message and one armed timer. A new message from the same
//! sender replaces the pending one and restarts the timer, so only the last
//! message of a burst reaches the workflow engine, once the sender has been
//! quiet for a full window.
//!
//! Timers are plain spawned sleeps whose [`AbortHandle`] lives next to the
//! pending message. Every arm also takes a fresh generation number, and a
//! timer only fires its entry if the generation still matches. That covers a
//! timer that had already woken when it was replaced.
//!
//! # Capacity
//!
//! A sender with no pending entry needs a slot before it can be armed, and
//! [`Debouncer::submit`] suspends until one is free. The slot moves with the
//! entry and is only given back once the dispatcher has accepted the message,
//! so a stalled engine eventually stalls the workers and the inbound queue
//! fills and sheds load.
//!
//! [`Debouncer::flush_all`] is the shutdown path: every pending message is
//! handed to the dispatcher at once and the debouncer switches to
//! pass-through, so later submissions are dispatched directly rather than
//! armed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::dispatch::Dispatcher;
use crate::health::Counters;
use crate::types::{ParsedMessage, SenderId};

/// Default coalescing window.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Default number of senders that may hold a pending or undelivered message.
pub const DEFAULT_MAX_PENDING_SENDERS: usize = 500;

struct Pending {
    message: ParsedMessage,
    generation: u64,
    timer: AbortHandle,
    slot: OwnedSemaphorePermit,
}

#[derive(Default)]
struct State {
    pending: HashMap<SenderId, Pending>,
    next_generation: u64,
    pass_through: bool,
}

/// Why [`Debouncer::arm`] handed a message back.
enum Refused {
    PassThrough(ParsedMessage),
    NeedSlot(ParsedMessage),
}

pub struct Debouncer {
    window: Duration,
    state: Mutex<State>,
    slots: Arc<Semaphore>,
    handoff: TaskTracker,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
}

impl Debouncer {
    /// # Panics
    ///
    /// Panics if `max_pending` is zero.
    pub fn new(
        window: Duration,
        max_pending: usize,
        dispatcher: Dispatcher,
        counters: Arc<Counters>,
    ) -> Self {
        assert!(max_pending > 0, "debouncer capacity must be positive");
        Debouncer {
            window,
            state: Mutex::new(State::default()),
            slots: Arc::new(Semaphore::new(max_pending)),
            handoff: TaskTracker::new(),
            dispatcher,
            counters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of senders with a message waiting on a timer.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_pass_through(&self) -> bool {
        self.lock().pass_through
    }

    /// Accepts a message, replacing any pending one from the same sender.
    ///
    /// Suspends while every slot is taken, and in pass-through mode while
    /// the dispatcher has no free permit.
    pub async fn submit(self: &Arc<Self>, message: ParsedMessage) {
        let mut message = message;
        let mut slot = None;
        loop {
            match self.arm(message, slot.take()) {
                Ok(()) => return,
                Err(Refused::PassThrough(m)) => {
                    trace!(message_id = %m.message_id, "debouncer flushed; dispatching directly");
                    self.dispatcher.dispatch(m).await;
                    return;
                }
                Err(Refused::NeedSlot(m)) => {
                    message = m;
                    // Closed by `flush_all`; the next `arm` sees pass-through.
                    slot = Arc::clone(&self.slots).acquire_owned().await.ok();
                }
            }
        }
    }

    /// Drops the pending message for `sender` without dispatching it.
    pub fn cancel(&self, sender: &SenderId) -> Option<ParsedMessage> {
        let mut state = self.lock();
        let pending = state.pending.remove(sender)?;
        pending.timer.abort();
        self.counters.set_debounce_pending(state.pending.len());
        Some(pending.message)
    }

    /// Hands every pending message to the dispatcher now and switches to
    /// pass-through.
    ///
    /// Returns how many messages were flushed.
    pub fn flush_all(&self) -> usize {
        let flushed: Vec<Pending> = {
            let mut state = self.lock();
            state.pass_through = true;
            let drained: Vec<Pending> = state.pending.drain().map(|(_, p)| p).collect();
            self.counters.set_debounce_pending(0);
            drained
        };
        self.slots.close();

        let count = flushed.len();
        for pending in flushed {
            pending.timer.abort();
            self.hand_off(pending.message, pending.slot);
        }
        info!(flushed = count, "debouncer flushed");
        count
    }

    /// Waits until every fired or flushed message has been accepted by the
    /// dispatcher, or `timeout` elapses. Returns false on timeout.
    pub async fn wait_handed_off(&self, timeout: Duration) -> bool {
        self.handoff.close();
        tokio::time::timeout(timeout, self.handoff.wait())
            .await
            .is_ok()
    }

    /// Arms (or re-arms) the timer for the message's sender.
    fn arm(
        self: &Arc<Self>,
        message: ParsedMessage,
        fresh_slot: Option<OwnedSemaphorePermit>,
    ) -> Result<(), Refused> {
        let mut state = self.lock();
        if state.pass_through {
            return Err(Refused::PassThrough(message));
        }

        let sender = message.sender.clone();
        let slot = match state.pending.remove(&sender) {
            Some(previous) => {
                previous.timer.abort();
                self.counters.record_coalesced();
                debug!(
                    replaced = %previous.message.message_id,
                    sender = %previous.message.sender,
                    "coalesced message into newer one"
                );
                previous.slot
            }
            None => match fresh_slot {
                Some(slot) => slot,
                None => return Err(Refused::NeedSlot(message)),
            },
        };

        let generation = state.next_generation;
        state.next_generation += 1;

        let this = Arc::clone(self);
        let timer_sender = sender.clone();
        let window = self.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.fire(&timer_sender, generation);
        })
        .abort_handle();

        state.pending.insert(
            sender,
            Pending {
                message,
                generation,
                timer,
                slot,
            },
        );
        self.counters.set_debounce_pending(state.pending.len());
        Ok(())
    }

    fn fire(&self, sender: &SenderId, generation: u64) {
        let pending = {
            let mut state = self.lock();
            if state.pending.get(sender).map(|p| p.generation) != Some(generation) {
                return;
            }
            let Some(pending) = state.pending.remove(sender) else {
                return;
            };
            self.counters.set_debounce_pending(state.pending.len());
            pending
        };
        trace!(message_id = %pending.message.message_id, "debounce window closed");
        self.hand_off(pending.message, pending.slot);
    }

    /// Passes `message` to the dispatcher, releasing `slot` once accepted.
    fn hand_off(&self, message: ParsedMessage, slot: OwnedSemaphorePermit) {
        let dispatcher = self.dispatcher.clone();
        self.handoff.spawn(async move {
            dispatcher.dispatch(message).await;
            drop(slot);
        });
    }
}
