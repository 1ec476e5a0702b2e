pub mod events;

pub use events::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for ids of the transient in-progress hook row. Finalized hook ids
/// never start with it.
pub const PLACEHOLDER_ID_PREFIX: &str = "hook-stream-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set only on the row that shows a hook while it is still streaming.
    #[serde(default)]
    pub is_placeholder: bool,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            is_placeholder: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            is_placeholder: false,
        }
    }

    pub fn hook_placeholder(content: impl Into<String>) -> Self {
        Self {
            id: format!("{PLACEHOLDER_ID_PREFIX}{}", Uuid::new_v4()),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            is_placeholder: true,
        }
    }
}

/// A finalized hook. Only `is_bookmarked` changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamingHook {
    pub id: String,
    pub content: String,
    pub index: u64,
    #[serde(default)]
    pub is_bookmarked: bool,
}

impl StreamingHook {
    pub fn new(id: impl Into<String>, content: impl Into<String>, index: u64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            index,
            is_bookmarked: false,
        }
    }
}

/// Everything a generation produces, in display order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transcript {
    pub messages: Vec<ConversationMessage>,
    pub hooks: Vec<StreamingHook>,
}

impl Transcript {
    pub fn message(&self, id: &str) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn remove_message(&mut self, id: &str) -> Option<ConversationMessage> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    pub fn hook(&self, id: &str) -> Option<&StreamingHook> {
        self.hooks.iter().find(|h| h.id == id)
    }

    pub fn hook_mut(&mut self, id: &str) -> Option<&mut StreamingHook> {
        self.hooks.iter_mut().find(|h| h.id == id)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter().filter(|m| m.is_placeholder)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.hooks.clear();
    }
}

/// Pagination block returned by the stored-hooks listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
    pub has_more: bool,
}

/// One page of hooks previously stored by the backend. Records are kept
/// as raw JSON; only `hooks` and `created_at` are read for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPage {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    pub pagination: Pagination,
}

impl HookPage {
    /// Flattens every record's `hooks` array (or single `hook` string) into
    /// `(created_at, text)` pairs.
    pub fn hook_texts(&self) -> Vec<(Option<&str>, &str)> {
        let mut out = Vec::new();
        for record in &self.data {
            let created_at = record.get("created_at").and_then(|v| v.as_str());
            if let Some(hooks) = record.get("hooks").and_then(|v| v.as_array()) {
                out.extend(hooks.iter().filter_map(|h| h.as_str()).map(|t| (created_at, t)));
            } else if let Some(text) = record.get("hook").and_then(|v| v.as_str()) {
                out.push((created_at, text));
            }
        }
        out
    }
}
