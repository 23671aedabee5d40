//! Conversation - the owned, append-only message list of one task.

use crate::llm::{Message, Role};

/// Messages pinned at the head: the system prompt and the task statement
const PINNED: usize = 2;

const CLIP_MARKER: &str = "\n... [clipped to fit history]";

#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    max_chars: usize,
    dropped: usize,
}

impl Conversation {
    pub fn new(system: impl Into<String>, task: impl Into<String>, max_chars: usize) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(task)],
            max_chars,
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages removed by compaction so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn size_chars(&self) -> usize {
        self.messages.iter().map(Message::size_chars).sum()
    }

    /// Drop the oldest unpinned turns until the history fits the budget.
    ///
    /// A turn is an assistant message together with the tool replies to its
    /// calls, and is evicted as one unit so no tool message is ever left
    /// without its call. The newest turn always survives; if it alone is over
    /// budget its tool results are clipped instead. Returns the number of
    /// messages removed.
    pub fn compact(&mut self) -> usize {
        let before = self.messages.len();
        while self.messages.len() > PINNED && self.messages[PINNED].role == Role::Tool {
            self.messages.remove(PINNED);
        }

        let mut size = self.size_chars();
        while size > self.max_chars {
            let end = self.turn_end(PINNED);
            if end >= self.messages.len() {
                break;
            }
            let freed: usize = self.messages.drain(PINNED..end).map(|m| m.size_chars()).sum();
            size = size.saturating_sub(freed);
        }
        if size > self.max_chars {
            self.clip_tool_results(size - self.max_chars);
        }

        let removed = before - self.messages.len();
        if removed > 0 {
            self.dropped += removed;
            log::debug!("Compacted conversation: dropped {} messages ({} chars remain)", removed, self.size_chars());
        }
        removed
    }

    /// Index one past the turn starting at `start`
    fn turn_end(&self, start: usize) -> usize {
        let mut end = start + 1;
        if self.messages[start].role == Role::Assistant && !self.messages[start].tool_calls.is_empty() {
            while end < self.messages.len() && self.messages[end].role == Role::Tool {
                end += 1;
            }
        }
        end
    }

    /// Shorten tool results, largest first, until `excess` bytes are gone
    fn clip_tool_results(&mut self, mut excess: usize) {
        let mut tools: Vec<usize> = (PINNED..self.messages.len())
            .filter(|&i| self.messages[i].role == Role::Tool)
            .collect();
        tools.sort_by_key(|&i| std::cmp::Reverse(self.messages[i].content.len()));

        for i in tools {
            if excess == 0 {
                break;
            }
            let content = &self.messages[i].content;
            let len = content.len();
            if len <= CLIP_MARKER.len() {
                continue;
            }
            let mut keep = len.saturating_sub(excess + CLIP_MARKER.len());
            while !content.is_char_boundary(keep) {
                keep -= 1;
            }
            let clipped = format!("{}{}", &content[..keep], CLIP_MARKER);
            excess = excess.saturating_sub(len - clipped.len());
            log::debug!("Clipped tool result from {} to {} bytes", len, clipped.len());
            self.messages[i].content = clipped;
        }
    }
}
