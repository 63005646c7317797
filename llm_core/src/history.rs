use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tells the model how its output is spoken: text after `#` stays silent
/// and bracketed directives drive the face module.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant whose replies are spoken aloud \
with text-to-speech while you write them. Keep sentences short and natural. \
If you want to add something that should be shown but not spoken, put it at the very end after a # symbol. \
You can control your facial expression with inline tags that are never spoken: \
[neutral] for a neutral face, [smile:1] to [smile:3] for a slight to wide smile, \
[sad:1] or [sad:2] for a slightly or very upset face.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

struct Conversation {
    messages: Vec<ChatMessage>,
    last_accessed: u64,
}

#[derive(Default)]
struct Conversations {
    by_id: HashMap<String, Conversation>,
    // Logical clock for least-recently-used eviction
    clock: u64,
}

impl Conversations {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory chat histories keyed by conversation id. Holds at most
/// `max_conversations`; the least recently used one is evicted first.
pub struct ConversationStore {
    system_prompt: String,
    // Each turn is one user and one assistant message
    max_turns: usize,
    max_conversations: usize,
    conversations: Mutex<Conversations>,
}

impl ConversationStore {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize, max_conversations: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_turns: max_turns.max(1),
            max_conversations: max_conversations.max(1),
            conversations: Mutex::new(Conversations::default()),
        }
    }

    pub fn new_conversation_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, Conversations> {
        self.conversations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// System prompt, stored history, then the new user message.
    pub fn prompt_for(&self, conversation_id: &str, user_message: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt.clone())];
        messages.extend(self.history(conversation_id));
        messages.push(ChatMessage::user(user_message));
        messages
    }

    pub fn record_turn(&self, conversation_id: &str, user_message: &str, reply: &str) {
        let mut conversations = self.lock();
        let now = conversations.tick();

        if !conversations.by_id.contains_key(conversation_id)
            && conversations.by_id.len() >= self.max_conversations
        {
            let oldest = conversations
                .by_id
                .iter()
                .min_by_key(|(_, c)| c.last_accessed)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                debug!(conversation = %id, "evicting conversation");
                conversations.by_id.remove(&id);
            }
        }

        let conversation = conversations
            .by_id
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation {
                messages: Vec::new(),
                last_accessed: now,
            });
        conversation.last_accessed = now;
        let history = &mut conversation.messages;
        history.push(ChatMessage::user(user_message));
        history.push(ChatMessage::assistant(reply));

        let max_messages = self.max_turns * 2;
        if history.len() > max_messages {
            let excess = history.len() - max_messages;
            history.drain(..excess);
        }
    }

    pub fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let mut conversations = self.lock();
        let now = conversations.tick();
        match conversations.by_id.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.last_accessed = now;
                conversation.messages.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
