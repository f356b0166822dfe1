use std::collections::VecDeque;
use veil_llm::ChatMessage;

pub(crate) fn push_bounded<T>(history: &mut VecDeque<T>, item: T, limit: usize) {
    history.push_back(item);
    while history.len() > limit {
        let _ = history.pop_front();
    }
}

/// Caller system prompt (if any), prior turns, then the new prompt.
pub(crate) fn build_messages(
    system: Option<&str>,
    history: &VecDeque<ChatMessage>,
    prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(prompt));
    messages
}
