use std::io::Write;

use anyhow::Result;
use hookwright_schema::{HookPage, Role, Transcript};

/// Prints a transcript incrementally as snapshots arrive.
///
/// Assistant text is written as it grows. A full replacement that does not
/// extend what was already printed starts a fresh line. Finalized hooks are
/// printed once each; in-progress placeholders are never printed.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    message_id: Option<String>,
    printed: String,
    hooks_printed: usize,
}

impl TranscriptPrinter {
    pub fn render(&mut self, transcript: &Transcript, out: &mut impl Write) -> Result<()> {
        let reply = transcript
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.is_placeholder);

        if let Some(reply) = reply {
            if self.message_id.as_deref() != Some(reply.id.as_str()) {
                if !self.printed.is_empty() {
                    writeln!(out)?;
                }
                self.message_id = Some(reply.id.clone());
                self.printed.clear();
            }
            match reply.content.strip_prefix(self.printed.as_str()) {
                Some(rest) => write!(out, "{rest}")?,
                None => write!(out, "\n{}", reply.content)?,
            }
            self.printed.clone_from(&reply.content);
        }

        for hook in transcript.hooks.iter().skip(self.hooks_printed) {
            if self.hooks_printed == 0 && !self.printed.is_empty() {
                writeln!(out)?;
            }
            self.hooks_printed += 1;
            writeln!(out, "  [{}] {}", self.hooks_printed, hook.content)?;
        }

        out.flush()?;
        Ok(())
    }

    pub fn hooks_printed(&self) -> usize {
        self.hooks_printed
    }
}

pub fn print_hook_page(page: &HookPage, out: &mut impl Write) -> Result<()> {
    let texts = page.hook_texts();
    if texts.is_empty() {
        writeln!(out, "No saved hooks.")?;
    }
    for (i, (created_at, text)) in texts.iter().enumerate() {
        let n = page.pagination.offset as usize + i + 1;
        match created_at {
            Some(at) => writeln!(out, "{n:>4}. {text}  ({at})")?,
            None => writeln!(out, "{n:>4}. {text}")?,
        }
    }
    writeln!(
        out,
        "-- {} of {} records from offset {}{}",
        page.data.len(),
        page.pagination.total,
        page.pagination.offset,
        if page.pagination.has_more {
            ", more available"
        } else {
            ""
        }
    )?;
    Ok(())
}
