use crate::cache::DiskCache;
use crate::freshness::CacheKey;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Handle to the request that originated a cache operation. Held weakly on
/// the wait queue while the request is blocked behind an in-flight entry.
pub trait CacheRequest: Send + Sync {
    /// The request may retry its cache lookup now. Wake-up order is FIFO over
    /// the queue as it stood when the key emptied, but a freshly-unblocked
    /// request can itself re-block later arrivals; no fairness is guaranteed.
    fn notify_request_unblocked(&self);

    fn is_revalidation_request(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Writer,
    Reader { revalidating: bool },
}

struct OpenEntry {
    id: u64,
    kind: EntryKind,
    deletion_flag: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    open: HashMap<CacheKey, Vec<OpenEntry>>,
    waiters: HashMap<CacheKey, VecDeque<Weak<dyn CacheRequest>>>,
}

/// Open-entry registry and wait queue. Conflict checks, registration, and
/// waiter enqueueing happen under one lock so a lookup can never interleave
/// with a registration for the same key.
#[derive(Default)]
pub(crate) struct Registry {
    state: Mutex<State>,
    next_id: AtomicU64,
}

fn conflicts(existing: &[OpenEntry], kind: EntryKind) -> bool {
    match kind {
        // Writers and revalidating readers are exclusive against everything.
        EntryKind::Writer | EntryKind::Reader { revalidating: true } => !existing.is_empty(),
        // Plain readers coexist with other plain readers.
        EntryKind::Reader { revalidating: false } => existing.iter().any(|entry| {
            matches!(
                entry.kind,
                EntryKind::Writer | EntryKind::Reader { revalidating: true }
            )
        }),
    }
}

impl Registry {
    /// Registers a new entry under `cache_key`, or enqueues `request` on the
    /// key's wait queue and reports the conflict.
    pub(crate) fn try_register(
        &self,
        cache_key: CacheKey,
        kind: EntryKind,
        request: &Arc<dyn CacheRequest>,
    ) -> Option<(u64, Arc<AtomicBool>)> {
        let mut state = self.state.lock();
        let existing = state.open.entry(cache_key).or_default();

        if conflicts(existing, kind) {
            state
                .waiters
                .entry(cache_key)
                .or_default()
                .push_back(Arc::downgrade(request));
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deletion_flag = Arc::new(AtomicBool::new(false));
        existing.push(OpenEntry {
            id,
            kind,
            deletion_flag: deletion_flag.clone(),
        });

        Some((id, deletion_flag))
    }

    /// Non-binding conflict probe used before the (async) open sequence; on
    /// conflict the request is enqueued immediately.
    pub(crate) fn check_or_enqueue(
        &self,
        cache_key: CacheKey,
        kind: EntryKind,
        request: &Arc<dyn CacheRequest>,
    ) -> bool {
        let mut state = self.state.lock();

        let conflicted = state
            .open
            .get(&cache_key)
            .is_some_and(|existing| conflicts(existing, kind));

        if conflicted {
            state
                .waiters
                .entry(cache_key)
                .or_default()
                .push_back(Arc::downgrade(request));
        }

        conflicted
    }

    /// Removes one registration. When the key's list becomes empty, returns
    /// the waiters to be notified; the caller dispatches them from a
    /// separate task.
    pub(crate) fn close(&self, cache_key: CacheKey, id: u64) -> Vec<Weak<dyn CacheRequest>> {
        let mut state = self.state.lock();

        let Some(entries) = state.open.get_mut(&cache_key) else {
            return Vec::new();
        };

        entries.retain(|entry| entry.id != id);
        if !entries.is_empty() {
            return Vec::new();
        }

        state.open.remove(&cache_key);
        state
            .waiters
            .remove(&cache_key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Flags every open entry for `cache_key` for deletion; flagged entries
    /// self-delete on their next write, flush, or transfer attempt.
    pub(crate) fn mark_for_deletion(&self, cache_key: CacheKey) {
        let state = self.state.lock();
        if let Some(entries) = state.open.get(&cache_key) {
            for entry in entries {
                entry.deletion_flag.store(true, Ordering::Relaxed);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn open_entry_kinds(&self, cache_key: CacheKey) -> Vec<EntryKind> {
        self.state
            .lock()
            .open
            .get(&cache_key)
            .map(|entries| entries.iter().map(|entry| entry.kind).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, cache_key: CacheKey) -> usize {
        self.state
            .lock()
            .waiters
            .get(&cache_key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

/// Close capability for one registered entry. Closing notifies the manager
/// exactly once; dropping an unclosed registration is the backstop for early
/// returns and error paths.
pub(crate) struct Registration {
    cache: Arc<DiskCache>,
    cache_key: CacheKey,
    id: u64,
    deletion_flag: Arc<AtomicBool>,
    closed: bool,
}

impl Registration {
    pub(crate) fn new(
        cache: Arc<DiskCache>,
        cache_key: CacheKey,
        id: u64,
        deletion_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cache,
            cache_key,
            id,
            deletion_flag,
            closed: false,
        }
    }

    pub(crate) fn marked_for_deletion(&self) -> bool {
        self.deletion_flag.load(Ordering::Relaxed)
    }

    pub(crate) fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            self.cache.entry_closed(self.cache_key, self.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}
