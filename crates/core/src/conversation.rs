use crate::models::{ChatMessage, Citation, ScoredPoint, Session, SessionSummary};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    pub target_documents: Option<BTreeSet<String>>,
    pub history: Vec<ChatMessage>,
}

#[derive(Default)]
pub struct ConversationManager {
    sessions: RwLock<HashMap<String, Session>>,
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn citations_for(hits: &[ScoredPoint]) -> Vec<Citation> {
    hits.iter()
        .map(|hit| Citation {
            doc_id: hit.payload.doc_id.clone(),
            chunk_ordinal: hit.payload.ordinal,
        })
        .collect()
}

pub fn distinct_doc_ids(hits: &[ScoredPoint]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.payload.doc_id.as_str()))
        .map(|hit| hit.payload.doc_id.clone())
        .collect()
}

fn tail(messages: &[ChatMessage], count: usize) -> Vec<ChatMessage> {
    messages[messages.len().saturating_sub(count)..].to_vec()
}

fn empty_session(session_id: &str) -> Session {
    let now = Utc::now();
    Session {
        id: session_id.to_string(),
        messages: Vec::new(),
        target_documents: None,
        created_at: now,
        updated_at: now,
    }
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A non-null `target` replaces the stored scope; a null one keeps it.
    pub fn begin_turn(
        &self,
        session_id: &str,
        target: Option<BTreeSet<String>>,
        history_window: usize,
    ) -> TurnContext {
        let mut sessions = self.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| empty_session(session_id));

        if target.is_some() {
            session.target_documents = target;
        }
        session.updated_at = Utc::now();

        TurnContext {
            target_documents: session.target_documents.clone(),
            history: tail(&session.messages, history_window),
        }
    }

    pub fn append_turn(&self, session_id: &str, user: ChatMessage, assistant: ChatMessage) {
        let mut sessions = self.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| empty_session(session_id));
        session.messages.push(user);
        session.messages.push(assistant);
        session.updated_at = Utc::now();
    }

    pub fn recent_history(&self, session_id: &str, count: usize) -> Vec<ChatMessage> {
        self.read()
            .get(session_id)
            .map(|session| tail(&session.messages, count))
            .unwrap_or_default()
    }

    /// Most recently updated first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.read().values().map(SessionSummary::from).collect();
        summaries.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        summaries
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.read().get(session_id).cloned()
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    pub fn set_target(&self, session_id: &str, target: Option<BTreeSet<String>>) -> Session {
        let mut sessions = self.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| empty_session(session_id));
        session.target_documents = target;
        session.updated_at = Utc::now();
        session.clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexPoint, Role, TextChunk};

    fn hit(doc_id: &str, ordinal: u32) -> ScoredPoint {
        let chunk = TextChunk {
            ordinal,
            text: "t".to_string(),
            page_start: 1,
            page_end: 1,
        };
        let point = IndexPoint::from_chunk(doc_id, "n", &chunk, vec![1.0]);
        ScoredPoint {
            id: point.id,
            score: 0.5,
            payload: point.payload,
        }
    }

    fn targets(ids: &[&str]) -> Option<BTreeSet<String>> {
        Some(ids.iter().map(|id| id.to_string()).collect())
    }

    #[test]
    fn begin_turn_creates_session_with_target() {
        let manager = ConversationManager::new();
        let turn = manager.begin_turn("s1", targets(&["a"]), 6);
        assert_eq!(turn.target_documents, targets(&["a"]));
        assert!(turn.history.is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn null_target_keeps_existing_scope_and_non_null_replaces_it() {
        let manager = ConversationManager::new();
        manager.begin_turn("s1", targets(&["a"]), 6);
        assert_eq!(manager.begin_turn("s1", None, 6).target_documents, targets(&["a"]));
        assert_eq!(
            manager.begin_turn("s1", targets(&["b"]), 6).target_documents,
            targets(&["b"])
        );
    }

    #[test]
    fn history_window_returns_latest_messages_oldest_first() {
        let manager = ConversationManager::new();
        for turn in 0..10 {
            manager.append_turn(
                "s1",
                ChatMessage::user(format!("q{turn}"), None),
                ChatMessage::assistant(format!("a{turn}"), None, None),
            );
        }

        let context = manager.begin_turn("s1", None, 6);
        assert_eq!(context.history.len(), 6);
        assert_eq!(context.history[0].content, "q7");
        assert_eq!(context.history[5].content, "a9");
        assert_eq!(context.history[5].role, Role::Assistant);
        assert_eq!(manager.recent_history("s1", 10).len(), 10);
    }

    #[test]
    fn admin_operations() {
        let manager = ConversationManager::new();
        manager.begin_turn("old", None, 6);
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.set_target("new", targets(&["x"]));

        let listed = manager.list();
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[1].id, "old");

        assert_eq!(manager.get("new").and_then(|s| s.target_documents), targets(&["x"]));
        assert!(manager.delete("old"));
        assert!(!manager.delete("old"));
        assert!(manager.get("old").is_none());
    }

    #[test]
    fn citations_keep_duplicates_and_doc_ids_are_distinct() {
        let hits = vec![hit("a", 0), hit("b", 3), hit("a", 1)];
        let citations = citations_for(&hits);
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[1].chunk_ordinal, 3);
        assert_eq!(distinct_doc_ids(&hits), vec!["a".to_string(), "b".to_string()]);
    }
}
