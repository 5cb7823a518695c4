//! 对话记录：只追加的消息序列
//!
//! 与短期记忆不同，这里从不自动剪枝；发往后端时只截取最近 N 条。

use super::Message;

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近 n 条消息（保持原有顺序）
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_caps_and_keeps_order() {
        let mut t = Transcript::new();
        for i in 0..8 {
            t.push(Message::user(format!("m{i}"), vec![]));
        }
        let recent: Vec<_> = t.recent(6).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(recent, vec!["m2", "m3", "m4", "m5", "m6", "m7"]);
    }

    #[test]
    fn test_recent_shorter_than_window() {
        let mut t = Transcript::new();
        t.push(Message::user("only", vec![]));
        assert_eq!(t.recent(6).len(), 1);
        assert!(Transcript::new().recent(6).is_empty());
    }
}
