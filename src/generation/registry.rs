use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

/// Cancellable handle for one in-flight generation. The supervisor marks
/// it finished right before deregistering, so a cancel racing a normal
/// completion resolves to a clean no-op on either side.
#[derive(Clone)]
pub struct GenerationHandle {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl GenerationHandle {
    fn new() -> Self {
        GenerationHandle {
            token: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Process-wide table of in-flight generations, keyed by
/// `"{chat_id}_{suffix}"`. Shared by every request handler; DashMap
/// serializes the per-entry mutations.
#[derive(Clone, Default)]
pub struct GenerationRegistry {
    entries: Arc<DashMap<String, GenerationHandle>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, generation_id: &str) -> GenerationHandle {
        let handle = GenerationHandle::new();
        if self
            .entries
            .insert(generation_id.to_string(), handle.clone())
            .is_some()
        {
            warn!("replacing stale registry entry for generation {generation_id}");
        }
        handle
    }

    /// Removal on normal completion.
    pub fn finish(&self, generation_id: &str) {
        self.entries.remove(generation_id);
    }

    /// Requests cooperative cancellation. Returns whether a live task was
    /// found; cancelling an unknown or already-finished generation is a
    /// no-op.
    pub fn cancel(&self, generation_id: &str) -> bool {
        match self.entries.remove(generation_id) {
            Some((_, handle)) if !handle.is_finished() => {
                handle.cancel();
                info!("cancelled generation {generation_id}");
                true
            }
            _ => false,
        }
    }

    /// Cancels every live generation whose id starts with `"{chat_id}_"`
    /// and returns how many were cancelled. Finished entries are removed
    /// but not counted.
    pub fn cancel_all_for_chat(&self, chat_id: i32) -> usize {
        let prefix = format!("{chat_id}_");
        let ids: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| id.starts_with(&prefix))
            .collect();

        ids.iter().filter(|id| self.cancel(id)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let registry = GenerationRegistry::new();
        let handle = registry.register("7_101");

        assert!(registry.cancel("7_101"));
        assert!(handle.is_cancelled());
        // second call reports not-found, never errors
        assert!(!registry.cancel("7_101"));
    }

    #[test]
    fn cancelling_a_finished_generation_is_a_noop() {
        let registry = GenerationRegistry::new();
        let handle = registry.register("7_102");
        handle.mark_finished();

        assert!(!registry.cancel("7_102"));
        assert!(!handle.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn prefix_cancel_is_scoped_to_the_chat() {
        let registry = GenerationRegistry::new();
        let a = registry.register("7_101");
        let b = registry.register("7_202");
        let other = registry.register("71_303");

        assert_eq!(registry.cancel_all_for_chat(7), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn prefix_cancel_skips_finished_entries() {
        let registry = GenerationRegistry::new();
        let live = registry.register("9_101");
        let done = registry.register("9_102");
        done.mark_finished();

        assert_eq!(registry.cancel_all_for_chat(9), 1);
        assert!(live.is_cancelled());
        assert!(!done.is_cancelled());
    }

    #[test]
    fn re_registering_replaces_the_entry() {
        let registry = GenerationRegistry::new();
        let stale = registry.register("3_100");
        let fresh = registry.register("3_100");

        assert!(registry.cancel("3_100"));
        assert!(fresh.is_cancelled());
        assert!(!stale.is_cancelled());
    }
}
