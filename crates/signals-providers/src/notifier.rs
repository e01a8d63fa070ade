use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A single chat or user.
    Chat(i64),
    /// The default broadcast group.
    Group,
    /// The summary group.
    SecondGroup,
    /// Every administrator, one message each.
    Admins,
}

impl Target {
    /// Chat id `0` addresses the default broadcast group.
    pub fn from_chat_id(id: i64) -> Self {
        if id == 0 { Target::Group } else { Target::Chat(id) }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Chat(id) => write!(f, "chat {id}"),
            Target::Group => f.write_str("group"),
            Target::SecondGroup => f.write_str("second group"),
            Target::Admins => f.write_str("admins"),
        }
    }
}

/// Outbound channel for pre-formatted HTML messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, target: Target, html: &str) -> Result<(), NotifyError>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, target: Target, html: &str) -> Result<(), NotifyError> {
        info!(%target, "\n{html}");
        Ok(())
    }
}

/// Split `text` into chunks of at most `limit` characters, breaking on line
/// boundaries where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chat_id_is_the_group() {
        assert_eq!(Target::from_chat_id(0), Target::Group);
        assert_eq!(Target::from_chat_id(42), Target::Chat(42));
    }

    #[test]
    fn short_messages_are_not_split() {
        assert_eq!(split_message("a\nb\n", 100), vec!["a\nb\n".to_string()]);
    }

    #[test]
    fn long_messages_split_on_lines() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb\n", "cccc\n"]);
    }

    #[test]
    fn oversized_lines_are_cut() {
        let chunks = split_message("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }
}
