use bytes::Bytes;
use meshchat_shared::constants::{DEFAULT_MESSAGE_COLOR, SYSTEM_AUTHOR};
use meshchat_shared::{now_millis, ChatFrame, FrameKind};

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: FrameKind,
    pub text: String,
    pub author: String,
    pub timestamp: i64,
    pub color: String,
    /// Declared size of a FILE message.
    pub size: Option<u64>,
    /// Declared MIME type of a FILE message.
    pub mime: Option<String>,
    /// File content, present only on the participant that shared it.
    pub content: Option<Bytes>,
}

impl Message {
    pub fn text(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            text: text.into(),
            author: author.into(),
            timestamp: now_millis(),
            color: DEFAULT_MESSAGE_COLOR.to_string(),
            size: None,
            mime: None,
            content: None,
        }
    }

    pub fn file(
        filename: impl Into<String>,
        author: impl Into<String>,
        mime: Option<String>,
        content: Bytes,
    ) -> Self {
        Self {
            kind: FrameKind::File,
            size: Some(content.len() as u64),
            mime,
            content: Some(content),
            ..Self::text(filename, author)
        }
    }

    /// A message received from a peer, shown in that peer's color.
    pub fn from_frame(frame: ChatFrame, color: impl Into<String>) -> Self {
        Self {
            kind: frame.kind,
            text: frame.text,
            author: frame.author,
            timestamp: frame.timestamp,
            color: color.into(),
            size: frame.size,
            mime: frame.mime,
            content: None,
        }
    }

    pub fn to_frame(&self) -> ChatFrame {
        ChatFrame {
            kind: self.kind,
            text: self.text.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
            size: self.size,
            mime: self.mime.clone(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.author == SYSTEM_AUTHOR
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemNotice {
    Login(String),
    Logout(String),
    Connected(String),
    FailedToConnect,
}

impl SystemNotice {
    pub fn text(&self) -> String {
        match self {
            SystemNotice::Login(name) => format!("User '{name}' is logged in"),
            SystemNotice::Logout(name) => format!("User '{name}' is logged out"),
            SystemNotice::Connected(name) => format!("You are connected as '{name}'"),
            SystemNotice::FailedToConnect => "FAILED TO CONNECT".to_string(),
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            SystemNotice::Login(_) | SystemNotice::Connected(_) => "green",
            SystemNotice::Logout(_) => "grey",
            SystemNotice::FailedToConnect => "red",
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            color: self.color().to_string(),
            ..Message::text(self.text(), SYSTEM_AUTHOR)
        }
    }
}

/// Messages ordered by timestamp; equal timestamps keep insertion order.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
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

    /// Latest FILE message announced by `author` under `filename`.
    pub fn find_file(&self, author: &str, filename: &str) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == FrameKind::File && m.author == author && m.text == filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str, timestamp: i64) -> Message {
        Message {
            timestamp,
            ..Message::text(text, "alice")
        }
    }

    #[test]
    fn test_sorted_by_timestamp() {
        let mut log = MessageLog::new();
        log.push(at("third", 30));
        log.push(at("first", 10));
        log.push(at("second", 20));

        let texts: Vec<&str> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut log = MessageLog::new();
        log.push(at("a", 5));
        log.push(at("b", 5));
        log.push(at("early", 1));
        log.push(at("c", 5));

        let texts: Vec<&str> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["early", "a", "b", "c"]);
    }

    #[test]
    fn test_system_notices() {
        let msg = SystemNotice::Logout("alice".into()).into_message();
        assert_eq!(msg.text, "User 'alice' is logged out");
        assert_eq!(msg.color, "grey");
        assert!(msg.is_system());

        assert_eq!(SystemNotice::FailedToConnect.into_message().color, "red");
        assert_eq!(
            SystemNotice::Connected("bob".into()).text(),
            "You are connected as 'bob'"
        );
    }

    #[test]
    fn test_file_message_frame_has_no_content() {
        let msg = Message::file(
            "notes.txt",
            "alice",
            Some("text/plain".into()),
            Bytes::from_static(b"hello"),
        );
        let frame = msg.to_frame();
        assert_eq!(frame.kind, FrameKind::File);
        assert_eq!(frame.size, Some(5));
        assert_eq!(frame.mime.as_deref(), Some("text/plain"));

        let received = Message::from_frame(frame, "#123456");
        assert!(received.content.is_none());
        assert_eq!(received.mime.as_deref(), Some("text/plain"));
        assert_eq!(received.color, "#123456");
    }

    #[test]
    fn test_find_file() {
        let mut log = MessageLog::new();
        log.push(Message::text("notes.txt", "alice"));
        assert!(log.find_file("alice", "notes.txt").is_none());

        log.push(Message::file("notes.txt", "alice", None, Bytes::from_static(b"x")));
        assert_eq!(log.find_file("alice", "notes.txt").unwrap().size, Some(1));
        assert!(log.find_file("bob", "notes.txt").is_none());
    }
}
