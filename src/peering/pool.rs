//! Deduplication of outbound RPC stubs by endpoint, reference counted.
use std::collections::HashMap;
use std::time::Duration;

/// Grace period before a zero-refcount stub is actually torn down, to
/// absorb flapping acquire/release pairs.
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(30);

struct Entry<T> {
    stub: T,
    refs: usize,
}

/// Reference-counted pool of stubs, keyed by endpoint.
///
/// `acquire` dials on first use and hands out clones of the same stub to
/// subsequent callers; `release` decrements, and the caller is expected to
/// schedule actual teardown after [`DEFAULT_TEARDOWN_GRACE`] once refcount
/// hits zero (see `Pool::idle_since`).
pub struct Pool<T> {
    stubs: HashMap<String, Entry<T>>,
    idle_since: HashMap<String, std::time::Instant>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            stubs: HashMap::new(),
            idle_since: HashMap::new(),
        }
    }
}

impl<T: Clone> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a stub for `endpoint`, dialing via `dial` if none exists yet.
    pub fn acquire(&mut self, endpoint: &str, dial: impl FnOnce() -> T) -> T {
        self.idle_since.remove(endpoint);
        let entry = self
            .stubs
            .entry(endpoint.to_string())
            .or_insert_with(|| Entry {
                stub: dial(),
                refs: 0,
            });
        entry.refs += 1;
        entry.stub.clone()
    }

    /// Release a previously-acquired stub. Marks the endpoint idle once the
    /// refcount reaches zero; does not remove it yet.
    pub fn release(&mut self, endpoint: &str) {
        if let Some(entry) = self.stubs.get_mut(endpoint) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                self.idle_since.insert(endpoint.to_string(), std::time::Instant::now());
            }
        }
    }

    /// Sweep endpoints that have been idle for at least `grace`, removing
    /// their stubs. Call this periodically from the engine's idle tick.
    pub fn sweep(&mut self, grace: Duration) {
        let expired: Vec<String> = self
            .idle_since
            .iter()
            .filter(|(_, since)| since.elapsed() >= grace)
            .map(|(k, _)| k.clone())
            .collect();
        for endpoint in expired {
            self.stubs.remove(&endpoint);
            self.idle_since.remove(&endpoint);
        }
    }

    pub fn refcount(&self, endpoint: &str) -> usize {
        self.stubs.get(endpoint).map(|e| e.refs).unwrap_or(0)
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.stubs.contains_key(endpoint)
    }
}
