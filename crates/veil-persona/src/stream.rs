use crate::persona::PersonaProfile;
use crate::rewrite::RewriteEngine;
use anyhow::{Error, Result};
use std::sync::Arc;
use veil_llm::{ChatChunk, ChatStream};

/// Held-back text beyond this size is flushed at its last whitespace even
/// without a sentence boundary.
const MAX_PENDING_BYTES: usize = 2048;

/// Wraps an upstream stream and emits sanitized text one complete sentence
/// at a time, so a vendor name split across chunks is still caught.
pub struct SanitizingStream {
    inner: ChatStream,
    engine: Arc<RewriteEngine>,
    persona: Arc<PersonaProfile>,
    pending: String,
    /// Upstream error held until the text before it has been emitted.
    deferred: Option<Error>,
    leading: bool,
    exhausted: bool,
}

impl SanitizingStream {
    pub fn new(inner: ChatStream, engine: Arc<RewriteEngine>, persona: Arc<PersonaProfile>) -> Self {
        Self {
            inner,
            engine,
            persona,
            pending: String::new(),
            deferred: None,
            leading: true,
            exhausted: false,
        }
    }

    fn emit(&mut self, cut: usize) -> String {
        let rest = self.pending.split_off(cut);
        let segment = std::mem::replace(&mut self.pending, rest);
        let out = self
            .engine
            .sanitizer()
            .sanitize_segment(&segment, &self.persona, self.leading);
        if !segment.trim().is_empty() {
            self.leading = false;
        }
        out
    }

    /// Sanitizes and returns everything up to the last safe cut, if any.
    fn take_ready(&mut self) -> Option<String> {
        // A leading greeting is only decidable once the sentence after it
        // is complete.
        let floor = if self.leading {
            self.engine
                .sanitizer()
                .greeting_len(&self.pending)
                .unwrap_or(0)
        } else {
            0
        };

        let cut = last_sentence_boundary(&self.pending[floor..])
            .map(|idx| idx + floor)
            .or_else(|| {
                (self.pending.len() > MAX_PENDING_BYTES)
                    .then(|| last_whitespace(&self.pending[floor..]).map(|idx| idx + floor))
                    .flatten()
            })?;
        Some(self.emit(cut))
    }

    fn flush(&mut self) -> String {
        let len = self.pending.len();
        self.emit(len)
    }
}

impl Iterator for SanitizingStream {
    type Item = Result<ChatChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(err) = self.deferred.take() {
                return Some(Err(err));
            }
            if self.exhausted {
                return None;
            }

            match self.inner.next() {
                Some(Ok(chunk)) => {
                    self.pending.push_str(&chunk.delta);
                    if chunk.finish_reason.is_some() {
                        return Some(Ok(ChatChunk {
                            delta: self.flush(),
                            finish_reason: chunk.finish_reason,
                        }));
                    }
                    if let Some(text) = self.take_ready() {
                        return Some(Ok(ChatChunk::text(text)));
                    }
                }
                Some(Err(err)) => {
                    if self.pending.is_empty() {
                        return Some(Err(err));
                    }
                    self.deferred = Some(err);
                    return Some(Ok(ChatChunk::text(self.flush())));
                }
                None => {
                    self.exhausted = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    return Some(Ok(ChatChunk::text(self.flush())));
                }
            }
        }
    }
}

/// Byte offset just past the last sentence end: `.`, `!` or `?` followed by
/// whitespace, or a newline.
fn last_sentence_boundary(text: &str) -> Option<usize> {
    let mut boundary = None;
    let mut prev_terminal = false;
    for (idx, ch) in text.char_indices() {
        if ch == '\n' || (prev_terminal && ch.is_whitespace()) {
            boundary = Some(idx + ch.len_utf8());
        }
        prev_terminal = matches!(ch, '.' | '!' | '?');
    }
    boundary
}

fn last_whitespace(text: &str) -> Option<usize> {
    text.char_indices()
        .filter(|(_, ch)| ch.is_whitespace())
        .last()
        .map(|(idx, ch)| idx + ch.len_utf8())
}
