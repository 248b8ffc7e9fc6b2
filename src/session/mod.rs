use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::chat::intent::Mood;

/// How many detected moods a session remembers.
const MOOD_HISTORY_LEN: usize = 5;

/// Per-conversation state accumulated across stateless requests.
///
/// The suggested-name set only ever grows within a process lifetime; nothing
/// removes entries from it.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Display names of every item suggested to this session so far
    pub suggested: HashSet<String>,
    /// Names from the most recent recommendation turn, for follow-ups
    pub last_suggested: Vec<String>,
    /// Rolling history of detected moods, most recent last
    pub moods: Vec<Mood>,
}

impl SessionState {
    pub fn note_mood(&mut self, mood: Mood) {
        self.moods.push(mood);
        if self.moods.len() > MOOD_HISTORY_LEN {
            self.moods.remove(0);
        }
    }

    pub fn current_mood(&self) -> Option<Mood> {
        self.moods.last().copied()
    }

    pub fn add_suggested<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.suggested.extend(names);
    }
}

/// Key-value store for session state, injected into the pipeline so
/// multi-instance deployments can swap in a shared backend.
pub trait SessionStore: Send + Sync {
    /// Returns the session's state, or a fresh default for unknown ids.
    fn load(&self, session_id: &str) -> SessionState;

    /// Writes the session's state back. Concurrent turns for one session can
    /// race here; de-duplication is best-effort by design.
    fn store(&self, session_id: &str, state: SessionState);
}

struct SessionEntry {
    state: SessionState,
    last_seen: Instant,
}

/// In-memory session store with a capacity bound and idle-TTL eviction.
pub struct InMemorySessionStore {
    entries: DashMap<String, SessionEntry>,
    capacity: usize,
    idle_ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts idle-expired sessions first; if the map is still over
    /// capacity, drops the least recently seen entries.
    fn evict(&self) {
        if self.entries.len() <= self.capacity {
            return;
        }

        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_ttl);

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_seen)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!(session = %key, "evicted least recently seen session");
                }
                None => break,
            }
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, session_id: &str) -> SessionState {
        self.entries
            .get(session_id)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    fn store(&self, session_id: &str, state: SessionState) {
        self.entries.insert(
            session_id.to_string(),
            SessionEntry {
                state,
                last_seen: Instant::now(),
            },
        );
        self.evict();
    }
}
