//! Long-poll suspension registry.
//!
//! Requests that wait for something to happen (an order being paid, a refund being granted, a new order showing up in
//! a listing) park themselves here under a key. Whoever makes the thing happen calls [`LongPollRegistry::resume`] with
//! the same key, and every waiter on that key wakes up and re-reads storage.
//!
//! The registry keeps two views of the same set of waiters:
//! * a multimap from key to waiter ids, used by `resume`;
//! * an ordered set of `(deadline, id)`, used by a single background timer task that always sleeps until the earliest
//!   deadline and times out every waiter that is due.
//!
//! Both views are updated under one lock, so they always hold exactly the same waiters. A [`Suspension`] removes
//! itself from both when it is dropped, which is what happens when the HTTP client goes away mid-poll.
use std::{
    collections::{BTreeSet, HashMap},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
    time::Duration,
};

use log::*;
use tokio::{
    sync::{oneshot, Notify},
    time::Instant,
};

use crate::{
    crypto::{EddsaPublicKey, ShortHash},
    db_types::OrderId,
};

/// How long the timer task sleeps when nobody is waiting.
const IDLE_TICK: Duration = Duration::from_secs(60);
/// Upper bound for a single suspension.
const MAX_SUSPENSION: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Resumed,
    TimedOut,
    /// The registry was shut down.
    Cancelled,
}

/// The key payment-status pollers wait on: `H(order_id || merchant_pub)`.
pub fn payment_resume_key(order_id: &OrderId, merchant_pub: &EddsaPublicKey) -> ShortHash {
    ShortHash::of_parts(&[order_id.as_str().as_bytes(), merchant_pub.as_bytes()])
}

struct Waiter<K> {
    key: K,
    deadline: Instant,
    wake: oneshot::Sender<WakeReason>,
}

struct State<K> {
    next_id: u64,
    waiters: HashMap<u64, Waiter<K>>,
    by_key: HashMap<K, Vec<u64>>,
    deadlines: BTreeSet<(Instant, u64)>,
}

impl<K: Eq + Hash + Clone> State<K> {
    fn remove(&mut self, id: u64) -> Option<Waiter<K>> {
        let waiter = self.waiters.remove(&id)?;
        self.deadlines.remove(&(waiter.deadline, id));
        if let Some(ids) = self.by_key.get_mut(&waiter.key) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.by_key.remove(&waiter.key);
            }
        }
        Some(waiter)
    }

    /// Times out every waiter whose deadline has passed and returns the next deadline, if any.
    fn expire(&mut self, now: Instant) -> Option<Instant> {
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                return Some(deadline);
            }
            if let Some(waiter) = self.remove(id) {
                let _ = waiter.wake.send(WakeReason::TimedOut);
            }
        }
        None
    }
}

struct Shared<K> {
    state: Mutex<State<K>>,
    notify: Arc<Notify>,
    timer_started: AtomicBool,
}

impl<K> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K> Drop for Shared<K> {
    fn drop(&mut self) {
        self.notify.notify_one();
    }
}

pub struct LongPollRegistry<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for LongPollRegistry<K> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<K> Default for LongPollRegistry<K>
where K: Eq + Hash + Clone + Send + 'static
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LongPollRegistry<K>
where K: Eq + Hash + Clone + Send + 'static
{
    pub fn new() -> Self {
        let state = State { next_id: 0, waiters: HashMap::new(), by_key: HashMap::new(), deadlines: BTreeSet::new() };
        let shared =
            Shared { state: Mutex::new(state), notify: Arc::new(Notify::new()), timer_started: AtomicBool::new(false) };
        Self { shared: Arc::new(shared) }
    }

    /// Parks a waiter under `key` until it is resumed or `timeout` elapses. Must be called from within a tokio runtime.
    pub fn suspend(&self, key: K, timeout: Duration) -> Suspension<K> {
        self.ensure_timer();
        let now = Instant::now();
        let deadline = now.checked_add(timeout.min(MAX_SUSPENSION)).unwrap_or(now + MAX_SUSPENSION);
        let (tx, rx) = oneshot::channel();
        let (id, earliest) = {
            let mut state = self.shared.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.waiters.insert(id, Waiter { key: key.clone(), deadline, wake: tx });
            state.by_key.entry(key).or_default().push(id);
            state.deadlines.insert((deadline, id));
            let earliest = state.deadlines.first().map(|(_, first)| *first == id).unwrap_or(false);
            (id, earliest)
        };
        if earliest {
            self.shared.notify.notify_one();
        }
        trace!("⏳️ Waiter {id} suspended for {}ms", timeout.as_millis());
        Suspension { id, registry: Arc::downgrade(&self.shared), receiver: Some(rx) }
    }

    /// Wakes every waiter parked under `key`. Returns how many there were.
    pub fn resume(&self, key: &K) -> usize {
        let woken = {
            let mut state = self.shared.lock();
            let ids = state.by_key.get(key).cloned().unwrap_or_default();
            ids.into_iter().filter_map(|id| state.remove(id)).collect::<Vec<_>>()
        };
        let count = woken.len();
        for waiter in woken {
            let _ = waiter.wake.send(WakeReason::Resumed);
        }
        if count > 0 {
            debug!("⏳️ Resumed {count} waiter(s)");
        }
        count
    }

    /// Wakes every waiter with [`WakeReason::Cancelled`]. Used on shutdown.
    pub fn cancel_all(&self) {
        let woken = {
            let mut state = self.shared.lock();
            let ids = state.waiters.keys().copied().collect::<Vec<_>>();
            ids.into_iter().filter_map(|id| state.remove(id)).collect::<Vec<_>>()
        };
        for waiter in woken {
            let _ = waiter.wake.send(WakeReason::Cancelled);
        }
    }

    /// Number of waiters reachable by key.
    pub fn map_len(&self) -> usize {
        self.shared.lock().by_key.values().map(Vec::len).sum()
    }

    /// Number of waiters in the deadline queue.
    pub fn heap_len(&self) -> usize {
        self.shared.lock().deadlines.len()
    }

    fn ensure_timer(&self) {
        if self.shared.timer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::downgrade(&self.shared);
        let notify = Arc::clone(&self.shared.notify);
        tokio::spawn(run_timer(registry, notify));
    }
}

async fn run_timer<K>(registry: Weak<Shared<K>>, notify: Arc<Notify>)
where K: Eq + Hash + Clone + Send + 'static {
    debug!("⏳️ Long-poll timer started");
    loop {
        let next = match registry.upgrade() {
            Some(shared) => {
                let next = shared.lock().expire(Instant::now());
                next
            },
            None => break,
        };
        let wake_at = next.unwrap_or_else(|| Instant::now() + IDLE_TICK);
        tokio::select! {
            _ = notify.notified() => {},
            _ = tokio::time::sleep_until(wake_at) => {},
        }
    }
    debug!("⏳️ Long-poll timer stopped");
}

/// A parked request. Dropping it before it wakes removes it from the registry.
pub struct Suspension<K: Eq + Hash + Clone> {
    id: u64,
    registry: Weak<Shared<K>>,
    receiver: Option<oneshot::Receiver<WakeReason>>,
}

impl<K: Eq + Hash + Clone> Suspension<K> {
    pub async fn wait(mut self) -> WakeReason {
        match self.receiver.take() {
            Some(rx) => rx.await.unwrap_or(WakeReason::Cancelled),
            None => WakeReason::Cancelled,
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for Suspension<K> {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            if shared.lock().remove(self.id).is_some() {
                trace!("⏳️ Waiter {} left before being woken", self.id);
            }
        }
    }
}
