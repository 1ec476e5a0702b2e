//! Folds generation events into a transcript.
//!
//! A [`GenerationContext`] lives for exactly one attempt. It tracks the open
//! assistant reply, the open in-progress hook row and the text accumulated
//! for that hook. The two open rows are tracked separately and never share
//! an id.

use hookwright_schema::{
    ChunkSection, ConversationMessage, GenerationEvent, StreamingHook, Transcript,
};

use crate::HookIdGenerator;

const DEFAULT_FAILURE_MESSAGE: &str = "generation failed";

/// What the caller should do after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The backend reported completion. More events may still follow and
    /// are applied normally.
    Completed,
    /// The backend reported an error; the attempt is over.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct GenerationContext {
    conversation_message_id: Option<String>,
    hook_streaming_message_id: Option<String>,
    current_hook_streaming_content: String,
    completed: bool,
}

fn open_message<'t>(
    id: Option<&str>,
    transcript: &'t mut Transcript,
) -> Option<&'t mut ConversationMessage> {
    transcript.message_mut(id?)
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_message_id(&self) -> Option<&str> {
        self.conversation_message_id.as_deref()
    }

    pub fn hook_streaming_message_id(&self) -> Option<&str> {
        self.hook_streaming_message_id.as_deref()
    }

    pub fn current_hook_streaming_content(&self) -> &str {
        &self.current_hook_streaming_content
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn apply(
        &mut self,
        transcript: &mut Transcript,
        ids: &HookIdGenerator,
        event: GenerationEvent,
    ) -> Step {
        tracing::debug!(kind = event.kind(), "applying generation event");

        match event {
            GenerationEvent::Conversation { content } => {
                match open_message(self.conversation_message_id.as_deref(), transcript) {
                    Some(message) => message.content = content,
                    None => self.open_conversation(transcript, content),
                }
                Step::Continue
            }
            GenerationEvent::Chunk {
                section: ChunkSection::Conversation,
                content,
            } => {
                match open_message(self.conversation_message_id.as_deref(), transcript) {
                    Some(message) => message.content.push_str(&content),
                    None => self.open_conversation(transcript, content),
                }
                Step::Continue
            }
            GenerationEvent::Chunk {
                section: ChunkSection::Hook,
                content,
            } => {
                self.current_hook_streaming_content.push_str(&content);
                match open_message(self.hook_streaming_message_id.as_deref(), transcript) {
                    Some(placeholder) => {
                        placeholder.content.clone_from(&self.current_hook_streaming_content);
                    }
                    None => {
                        let placeholder = ConversationMessage::hook_placeholder(
                            self.current_hook_streaming_content.clone(),
                        );
                        self.hook_streaming_message_id = Some(placeholder.id.clone());
                        transcript.messages.push(placeholder);
                    }
                }
                Step::Continue
            }
            GenerationEvent::Chunk {
                section: ChunkSection::Other,
                ..
            } => Step::Continue,
            GenerationEvent::Hook { content, index } => {
                let id = ids.next_id(index);
                tracing::debug!(hook_id = %id, index, "hook finalized");
                transcript.hooks.push(StreamingHook::new(id, content, index));
                self.drop_placeholder(transcript);
                Step::Continue
            }
            GenerationEvent::Complete => {
                self.drop_placeholder(transcript);
                self.completed = true;
                Step::Completed
            }
            GenerationEvent::Error { message } => {
                self.drop_placeholder(transcript);
                let message = if message.trim().is_empty() {
                    DEFAULT_FAILURE_MESSAGE.to_string()
                } else {
                    message
                };
                Step::Failed(message)
            }
            GenerationEvent::Unknown => Step::Continue,
        }
    }

    /// Removes the in-progress hook row and forgets its text. Used when the
    /// attempt ends for any reason.
    pub fn drop_placeholder(&mut self, transcript: &mut Transcript) {
        self.current_hook_streaming_content.clear();
        if let Some(id) = self.hook_streaming_message_id.take() {
            transcript.remove_message(&id);
        }
    }

    fn open_conversation(&mut self, transcript: &mut Transcript, content: String) {
        let message = ConversationMessage::assistant(content);
        self.conversation_message_id = Some(message.id.clone());
        transcript.messages.push(message);
    }
}
