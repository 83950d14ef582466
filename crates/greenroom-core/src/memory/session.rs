//! Short-term memory
//!
//! A bounded, ordered turn log per session. The log position is the only
//! ordering authority; timestamps are display metadata. When a session is
//! full the lowest-importance turn is evicted, oldest first on ties, so a
//! burst of small talk can never push out the turn that established the
//! project brief.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TURNS
// ============================================================================

/// Speaker role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Importance in [0, 1]; drives eviction and consolidation
    pub importance: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, importance: f64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            importance: importance.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }
}

struct SessionEntry {
    turns: Vec<Turn>,
    expires_at: Instant,
}

// ============================================================================
// SESSION STORE
// ============================================================================

/// In-process short-term memory for all sessions
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity: capacity.clamp(crate::config::STM_CAPACITY_MIN, crate::config::STM_CAPACITY_MAX),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().expect("session lock")
    }

    /// Append a turn, creating the session on first use and evicting the
    /// lowest-importance turn when at capacity (oldest on ties).
    pub fn append(&self, session_id: &str, turn: Turn) {
        let mut sessions = self.lock();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            turns: Vec::new(),
            expires_at: Instant::now() + self.ttl,
        });
        entry.expires_at = Instant::now() + self.ttl;

        if entry.turns.len() >= self.capacity {
            // Scanning front-to-back with a strict `<` keeps the earliest
            // minimum, which is exactly the tie-break the policy wants.
            let mut min_index = 0;
            for (i, t) in entry.turns.iter().enumerate() {
                if t.importance < entry.turns[min_index].importance {
                    min_index = i;
                }
            }
            entry.turns.remove(min_index);
        }
        entry.turns.push(turn);
    }

    /// Most recent `limit` turns in log order (all when `None`)
    pub fn get(&self, session_id: &str, limit: Option<usize>) -> Vec<Turn> {
        let mut sessions = self.lock();
        let expired = match sessions.get(session_id) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return vec![],
        };
        if expired {
            sessions.remove(session_id);
            return vec![];
        }

        let entry = sessions.get_mut(session_id).expect("checked above");
        entry.expires_at = Instant::now() + self.ttl;
        let turns = &entry.turns;
        match limit {
            Some(n) if n < turns.len() => turns[turns.len() - n..].to_vec(),
            _ => turns.clone(),
        }
    }

    /// Remove and return every turn with importance >= `threshold`
    pub fn consolidate(&self, session_id: &str, threshold: f64) -> Vec<Turn> {
        let mut sessions = self.lock();
        let Some(entry) = sessions.get_mut(session_id) else {
            return vec![];
        };
        let (promoted, kept): (Vec<Turn>, Vec<Turn>) = entry
            .turns
            .drain(..)
            .partition(|t| t.importance >= threshold);
        entry.turns = kept;
        promoted
    }

    /// Refresh the session TTL without reading it
    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.lock().get_mut(session_id) {
            entry.expires_at = Instant::now() + self.ttl;
        }
    }

    /// Drop a session outright
    pub fn clear(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn occupancy(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map(|e| e.turns.len()).unwrap_or(0)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Ids of all live sessions, purging expired ones on the way
    pub fn active_sessions(&self) -> Vec<String> {
        let mut sessions = self.lock();
        let now = Instant::now();
        sessions.retain(|_, e| e.expires_at > now);
        sessions.keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(7, Duration::from_secs(1800))
    }

    fn turn(content: &str, importance: f64) -> Turn {
        Turn::new(Role::User, content, importance)
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let store = store();
        for i in 0..20 {
            store.append("s1", turn(&format!("turn {i}"), 0.5));
            assert!(store.occupancy("s1") <= 7);
        }
        assert_eq!(store.occupancy("s1"), 7);
    }

    #[test]
    fn test_eviction_drops_lowest_importance() {
        let store = store();
        for (i, imp) in [0.9, 0.2, 0.7, 0.8, 0.6, 0.5, 0.4].iter().enumerate() {
            store.append("s1", turn(&format!("t{i}"), *imp));
        }
        // At capacity; a high-importance append must evict the 0.2 turn
        store.append("s1", turn("important", 0.95));

        let contents: Vec<String> = store
            .get("s1", None)
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert!(!contents.contains(&"t1".to_string()));
        assert!(contents.contains(&"important".to_string()));
        assert_eq!(contents.len(), 7);
    }

    #[test]
    fn test_eviction_tie_breaks_oldest() {
        let store = SessionStore::new(5, Duration::from_secs(60));
        for i in 0..5 {
            store.append("s1", turn(&format!("t{i}"), 0.5));
        }
        store.append("s1", turn("new", 0.5));

        let contents: Vec<String> = store
            .get("s1", None)
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert!(!contents.contains(&"t0".to_string()), "oldest tied turn evicted");
        assert!(contents.contains(&"t4".to_string()));
    }

    #[test]
    fn test_get_limit_returns_most_recent() {
        let store = store();
        for i in 0..5 {
            store.append("s1", turn(&format!("t{i}"), 0.5));
        }
        let last_two = store.get("s1", Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "t3");
        assert_eq!(last_two[1].content, "t4");
    }

    #[test]
    fn test_consolidate_removes_promoted_turns() {
        let store = store();
        let importances = [0.9, 0.2, 0.7, 0.1, 0.3, 0.85, 0.5];
        for (i, imp) in importances.iter().enumerate() {
            store.append("s1", turn(&format!("t{i}"), *imp));
        }

        let promoted = store.consolidate("s1", 0.6);
        assert_eq!(promoted.len(), 3);
        assert!(promoted.iter().all(|t| t.importance >= 0.6));
        assert_eq!(store.occupancy("s1"), 4);
    }

    #[test]
    fn test_ttl_expiry_destroys_session() {
        let store = SessionStore::new(7, Duration::from_millis(10));
        store.append("s1", turn("hello", 0.5));
        std::thread::sleep(Duration::from_millis(30));
        assert!(store.get("s1", None).is_empty());
        assert!(store.active_sessions().is_empty());
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.append("s1", turn("hello", 0.5));
        assert!(store.clear("s1"));
        assert!(!store.clear("s1"));
        assert_eq!(store.occupancy("s1"), 0);
    }

    #[test]
    fn test_capacity_is_clamped_to_bounds() {
        assert_eq!(SessionStore::new(99, Duration::from_secs(1)).capacity(), 9);
        assert_eq!(SessionStore::new(1, Duration::from_secs(1)).capacity(), 5);
    }
}
