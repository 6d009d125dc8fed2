//! Per-conversation bounded message history

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One historical chat line attached to a suggestion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    /// Display name of the sender
    pub sender: String,

    /// Message text
    pub content: String,

    /// True when the message was sent by the local user
    pub is_self: bool,

    /// Wall-clock timestamp in epoch milliseconds
    pub timestamp_ms: i64,

    /// Opaque message identifier when the host can supply one; used for de-dup
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Bounded, time-ordered window of recent messages for one conversation
#[derive(Debug)]
struct ConversationWindow {
    messages: Vec<ContextMessage>,
    last_access: Instant,
}

impl ConversationWindow {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_access: Instant::now(),
        }
    }
}

/// Tracks a capped number of conversations, each holding a capped,
/// timestamp-ordered, identifier-de-duplicated message window.
///
/// Messages can arrive out of chronological order from multiple hook points,
/// so every insert re-sorts the window; the window is small enough that this
/// stays cheap.
pub struct ConversationStore {
    windows: Arc<RwLock<HashMap<String, ConversationWindow>>>,
    window_cap: usize,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(window_cap: usize, max_conversations: usize) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            window_cap,
            max_conversations,
        }
    }

    /// Record a message in a conversation window.
    ///
    /// No-op when `conversation_id` or `content` is empty. A message whose
    /// identifier already exists in the window is silently dropped. Passing
    /// `None` for `timestamp_ms` stamps the message with the current time.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        sender: &str,
        content: &str,
        is_self: bool,
        identifier: Option<String>,
        timestamp_ms: Option<i64>,
    ) {
        if conversation_id.is_empty() || content.is_empty() {
            return;
        }

        let timestamp_ms = timestamp_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let mut windows = self.windows.write().await;

        let window = windows
            .entry(conversation_id.to_string())
            .or_insert_with(ConversationWindow::new);

        if let Some(id) = &identifier {
            let already_seen = window
                .messages
                .iter()
                .any(|m| m.identifier.as_deref() == Some(id.as_str()));
            if already_seen {
                debug!("Dropping duplicate message '{}' in '{}'", id, conversation_id);
                return;
            }
        }

        window.messages.push(ContextMessage {
            sender: sender.to_string(),
            content: content.to_string(),
            is_self,
            timestamp_ms,
            identifier,
        });
        window.messages.sort_by_key(|m| m.timestamp_ms);

        // Trim oldest first down to the cap
        if window.messages.len() > self.window_cap {
            let excess = window.messages.len() - self.window_cap;
            window.messages.drain(..excess);
        }
        window.last_access = Instant::now();

        // Too many tracked conversations: evict the least recently accessed
        if windows.len() > self.max_conversations {
            let stalest = windows
                .iter()
                .min_by_key(|(_, w)| w.last_access)
                .map(|(id, _)| id.clone());
            if let Some(id) = stalest {
                debug!("Evicting conversation window '{}'", id);
                windows.remove(&id);
            }
        }
    }

    /// Return at most `count` most-recent messages in chronological order
    pub async fn recent(&self, conversation_id: &str, count: usize) -> Vec<ContextMessage> {
        let mut windows = self.windows.write().await;
        match windows.get_mut(conversation_id) {
            Some(window) => {
                window.last_access = Instant::now();
                let start = window.messages.len().saturating_sub(count);
                window.messages[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Number of messages currently held for a conversation
    pub async fn len(&self, conversation_id: &str) -> usize {
        let windows = self.windows.read().await;
        windows.get(conversation_id).map_or(0, |w| w.messages.len())
    }

    /// Number of conversations currently tracked
    pub async fn conversation_count(&self) -> usize {
        self.windows.read().await.len()
    }
}
