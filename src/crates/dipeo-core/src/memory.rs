//! Conversation Memory (C3): per-person message log with selective
//! forgetting, consumed by LLM handlers.
//!
//! One store owns every message; each person holds an ordered list of
//! message ids plus a `forgotten_ids` set indexing into the owning store —
//! there are no back-references from messages to persons, so eviction has a
//! single owner and cannot leave dangling state.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::diagram::{ExecutionId, NodeId, PersonId};

pub const MAX_MESSAGES_PER_PERSON: usize = 100;
pub const MAX_GLOBAL_MESSAGES: usize = 10_000;

/// Token usage for one message or node run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
        self.cached += other.cached;
    }
}

/// One entry in the conversation log, owned by the [`ConversationStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_person_id: PersonId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_label: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tokens: Option<TokenUsage>,
}

/// The role and content a person sees when reading the conversation, after
/// the visibility/role-rewrite rules of §3 have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleMessage {
    pub role: &'static str,
    pub content: String,
    pub person_id: PersonId,
}

struct PersonLog {
    message_ids: VecDeque<String>,
    forgotten_ids: HashSet<String>,
}

impl PersonLog {
    fn new() -> Self {
        Self {
            message_ids: VecDeque::new(),
            forgotten_ids: HashSet::new(),
        }
    }

    fn push(&mut self, id: String) {
        self.message_ids.push_back(id);
        while self.message_ids.len() > MAX_MESSAGES_PER_PERSON {
            if let Some(evicted) = self.message_ids.pop_front() {
                self.forgotten_ids.remove(&evicted);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConversationStats {
    pub message_count: u64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

struct Inner {
    messages: HashMap<String, Message>,
    global_order: VecDeque<String>,
    person_logs: HashMap<PersonId, PersonLog>,
    execution_stats: HashMap<ExecutionId, ExecutionConversationStats>,
}

/// Owns every message across every person and execution in a single process.
pub struct ConversationStore {
    inner: Mutex<Inner>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: HashMap::new(),
                global_order: VecDeque::new(),
                person_logs: HashMap::new(),
                execution_stats: HashMap::new(),
            }),
        }
    }

    /// Appends `content` to each participant's log, per §4.3. `sender_person_id`
    /// is the author; `participants` is every person who should see it
    /// (typically the sender plus whoever else is party to the conversation).
    pub fn add_message(
        &self,
        content: impl Into<String>,
        sender_person_id: impl Into<PersonId>,
        execution_id: impl Into<ExecutionId>,
        participants: &[PersonId],
        node_id: impl Into<NodeId>,
        node_label: Option<String>,
        tokens: Option<TokenUsage>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let sender_person_id = sender_person_id.into();
        let execution_id = execution_id.into();
        let message = Message {
            id: id.clone(),
            content: content.into(),
            sender_person_id: sender_person_id.clone(),
            execution_id: execution_id.clone(),
            node_id: node_id.into(),
            node_label,
            timestamp: chrono::Utc::now(),
            tokens,
        };

        let mut inner = self.inner.lock().unwrap();
        inner.messages.insert(id.clone(), message);
        inner.global_order.push_back(id.clone());
        while inner.global_order.len() > MAX_GLOBAL_MESSAGES {
            if let Some(evicted_id) = inner.global_order.pop_front() {
                inner.messages.remove(&evicted_id);
                for log in inner.person_logs.values_mut() {
                    log.forgotten_ids.remove(&evicted_id);
                }
            }
        }

        let mut all_participants: Vec<&PersonId> = participants.iter().collect();
        if !all_participants.contains(&&sender_person_id) {
            all_participants.push(&sender_person_id);
        }
        for person_id in all_participants {
            inner
                .person_logs
                .entry(person_id.clone())
                .or_insert_with(PersonLog::new)
                .push(id.clone());
        }

        let stats = inner.execution_stats.entry(execution_id).or_default();
        stats.message_count += 1;
        if let Some(t) = tokens {
            stats.total_tokens += t.total;
            stats.input_tokens += t.input;
            stats.output_tokens += t.output;
            stats.cached_tokens += t.cached;
        }

        id
    }

    /// Applies the visibility and role-rewrite rules of §3: forgotten
    /// messages are skipped; a message from `person_id` reads as
    /// `assistant`, otherwise `user` prefixed with `[node_label]: `.
    pub fn visible_messages(&self, person_id: &str) -> Vec<VisibleMessage> {
        let inner = self.inner.lock().unwrap();
        let Some(log) = inner.person_logs.get(person_id) else {
            return Vec::new();
        };
        log.message_ids
            .iter()
            .filter(|id| !log.forgotten_ids.contains(*id))
            .filter_map(|id| inner.messages.get(id))
            .map(|m| {
                if m.sender_person_id == person_id {
                    VisibleMessage {
                        role: "assistant",
                        content: m.content.clone(),
                        person_id: person_id.to_string(),
                    }
                } else {
                    let content = match &m.node_label {
                        Some(label) => format!("[{label}]: {}", m.content),
                        None => m.content.clone(),
                    };
                    VisibleMessage {
                        role: "user",
                        content,
                        person_id: person_id.to_string(),
                    }
                }
            })
            .collect()
    }

    /// Marks all (or only `execution_id`'s) messages as forgotten for `person_id`.
    pub fn forget_for_person(&self, person_id: &str, execution_id: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = match inner.person_logs.get(person_id) {
            Some(log) => log.message_ids.iter().cloned().collect(),
            None => return,
        };
        let to_forget: Vec<String> = ids
            .into_iter()
            .filter(|id| match execution_id {
                Some(exec) => inner
                    .messages
                    .get(id)
                    .map(|m| m.execution_id == exec)
                    .unwrap_or(false),
                None => true,
            })
            .collect();
        if let Some(log) = inner.person_logs.get_mut(person_id) {
            log.forgotten_ids.extend(to_forget);
        }
    }

    /// Marks only messages *sent by* `person_id` as forgotten (for that
    /// person's own view of the conversation).
    pub fn forget_own_messages(&self, person_id: &str, execution_id: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = match inner.person_logs.get(person_id) {
            Some(log) => log.message_ids.iter().cloned().collect(),
            None => return,
        };
        let to_forget: Vec<String> = ids
            .into_iter()
            .filter(|id| {
                inner.messages.get(id).map_or(false, |m| {
                    m.sender_person_id == person_id
                        && execution_id.map_or(true, |exec| m.execution_id == exec)
                })
            })
            .collect();
        if let Some(log) = inner.person_logs.get_mut(person_id) {
            log.forgotten_ids.extend(to_forget);
        }
    }

    pub fn execution_stats(&self, execution_id: &str) -> ExecutionConversationStats {
        self.inner
            .lock()
            .unwrap()
            .execution_stats
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops whole executions' stats past `max_age`; does not touch messages
    /// still reachable from a person's log.
    pub fn cleanup_older_than(&self, max_age: chrono::Duration) {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = chrono::Utc::now() - max_age;
        let stale: Vec<ExecutionId> = inner
            .messages
            .values()
            .filter(|m| m.timestamp < cutoff)
            .map(|m| m.execution_id.clone())
            .collect();
        for exec in stale {
            inner.execution_stats.remove(&exec);
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock().unwrap();
        MemoryStats {
            person_count: inner.person_logs.len(),
            total_messages: inner.messages.len(),
            global_message_count: inner.global_order.len(),
            execution_count: inner.execution_stats.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub person_count: usize,
    pub total_messages: usize,
    pub global_message_count: usize,
    pub execution_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_rewrite_marks_sender_as_assistant() {
        let store = ConversationStore::new();
        store.add_message(
            "hi",
            "alice",
            "exec1",
            &["bob".to_string()],
            "n1",
            Some("Alice Node".to_string()),
            None,
        );
        let alice_view = store.visible_messages("alice");
        assert_eq!(alice_view[0].role, "assistant");
        let bob_view = store.visible_messages("bob");
        assert_eq!(bob_view[0].role, "user");
        assert_eq!(bob_view[0].content, "[Alice Node]: hi");
    }

    #[test]
    fn forget_for_person_then_visible_is_empty() {
        let store = ConversationStore::new();
        store.add_message("hi", "alice", "exec1", &["bob".to_string()], "n1", None, None);
        store.forget_for_person("bob", None);
        assert!(store.visible_messages("bob").is_empty());
    }

    #[test]
    fn forget_own_messages_only_affects_sender() {
        let store = ConversationStore::new();
        store.add_message("from alice", "alice", "exec1", &["bob".to_string()], "n1", None, None);
        store.add_message("from bob", "bob", "exec1", &["alice".to_string()], "n2", None, None);
        store.forget_own_messages("alice", None);
        let view = store.visible_messages("alice");
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].content, "from bob");
    }

    #[test]
    fn per_person_log_evicts_past_max() {
        let store = ConversationStore::new();
        for i in 0..(MAX_MESSAGES_PER_PERSON + 5) {
            store.add_message(
                format!("m{i}"),
                "alice",
                "exec1",
                &[],
                "n1",
                None,
                None,
            );
        }
        assert_eq!(store.visible_messages("alice").len(), MAX_MESSAGES_PER_PERSON);
    }

    #[test]
    fn execution_stats_accumulate_tokens() {
        let store = ConversationStore::new();
        store.add_message(
            "hi",
            "alice",
            "exec1",
            &[],
            "n1",
            None,
            Some(TokenUsage {
                input: 10,
                output: 5,
                total: 15,
                cached: 0,
            }),
        );
        let stats = store.execution_stats("exec1");
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.total_tokens, 15);
    }
}
