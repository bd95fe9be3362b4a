//! Hot tier: recent turns per session, kept for a bounded freshness window.
//!
//! The cache is never authoritative. A miss, an expired entry, or a failed write
//! only means the next read goes to the durable store.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::types::{SessionId, Turn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache lock poisoned")]
    Poisoned,

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub trait TurnCache: Send + Sync {
    /// Up to `max_turns` turns, most recent first, if the cache can answer on its own.
    fn recent(&self, session: SessionId, max_turns: usize) -> Option<Vec<Turn>>;

    /// Replace the cached window with `turns` (most recent first).
    ///
    /// `complete` means `turns` is the entire session log.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    fn fill(&self, session: SessionId, turns: &[Turn], complete: bool) -> Result<(), CacheError>;

    /// Extend a cached window with a newly persisted turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    fn append(&self, session: SessionId, turn: &Turn) -> Result<(), CacheError>;

    fn invalidate(&self, session: SessionId);
}

struct CachedWindow {
    /// Oldest first.
    turns: VecDeque<Turn>,
    /// The window starts at turn 1.
    complete: bool,
    refreshed_at: Instant,
}

pub struct InMemoryTurnCache {
    ttl: Duration,
    capacity: usize,
    windows: RwLock<HashMap<SessionId, CachedWindow>>,
}

impl InMemoryTurnCache {
    /// `capacity` is the number of turns kept per session.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, window: &CachedWindow) -> bool {
        window.refreshed_at.elapsed() < self.ttl
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.read().map_or(0, |w| w.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemoryTurnCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTurnCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl TurnCache for InMemoryTurnCache {
    fn recent(&self, session: SessionId, max_turns: usize) -> Option<Vec<Turn>> {
        let windows = self.windows.read().ok()?;
        let window = windows.get(&session)?;
        if !self.is_fresh(window) {
            return None;
        }
        if window.turns.len() < max_turns && !window.complete {
            return None;
        }
        Some(window.turns.iter().rev().take(max_turns).cloned().collect())
    }

    fn fill(&self, session: SessionId, turns: &[Turn], complete: bool) -> Result<(), CacheError> {
        let mut windows = self.windows.write().map_err(|_| CacheError::Poisoned)?;
        windows.retain(|_, w| self.is_fresh(w));

        let kept = turns.len().min(self.capacity);
        let window: VecDeque<Turn> = turns[..kept].iter().rev().cloned().collect();
        windows.insert(
            session,
            CachedWindow {
                turns: window,
                complete: complete && kept == turns.len(),
                refreshed_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn append(&self, session: SessionId, turn: &Turn) -> Result<(), CacheError> {
        let mut windows = self.windows.write().map_err(|_| CacheError::Poisoned)?;
        let Some(window) = windows.get_mut(&session) else {
            return Ok(());
        };

        let expected = window
            .turns
            .back()
            .map_or(1, |last| last.turn_number + 1);
        let contiguous = window.complete || !window.turns.is_empty();
        if !self.is_fresh(window) || !contiguous || turn.turn_number != expected {
            windows.remove(&session);
            return Ok(());
        }

        window.turns.push_back(turn.clone());
        while window.turns.len() > self.capacity {
            window.turns.pop_front();
            window.complete = false;
        }
        window.refreshed_at = Instant::now();
        Ok(())
    }

    fn invalidate(&self, session: SessionId) {
        if let Ok(mut windows) = self.windows.write() {
            windows.remove(&session);
        }
    }
}
