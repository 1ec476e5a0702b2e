use serde::{Deserialize, Serialize};

/// Which output a `chunk` event extends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSection {
    Conversation,
    Hook,
    /// Missing or unrecognised section; the chunk is ignored.
    #[default]
    #[serde(other)]
    Other,
}

/// One payload of the generation stream, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationEvent {
    /// Complete assistant reply; replaces whatever was shown so far.
    Conversation {
        #[serde(default)]
        content: String,
    },
    /// Incremental text for the reply or for the hook being streamed.
    Chunk {
        #[serde(default)]
        section: ChunkSection,
        #[serde(default)]
        content: String,
    },
    /// A finalized hook.
    Hook {
        #[serde(default)]
        content: String,
        #[serde(default)]
        index: u64,
    },
    Complete,
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl GenerationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conversation { .. } => "conversation",
            Self::Chunk { .. } => "chunk",
            Self::Hook { .. } => "hook",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}
