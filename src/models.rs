use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── History (REST) ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    #[serde(default)]
    pub data: Vec<Participant>,
}

/// A message as returned by the history endpoints. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(with = "graph_time")]
    pub created_time: DateTime<Utc>,
    pub from: Participant,
    #[serde(default)]
    pub to: Recipients,
    #[serde(rename = "message", default)]
    pub text: String,
}

impl Message {
    /// Whether the counter-party (rather than the page) wrote this message.
    pub fn is_from(&self, user_id: &str) -> bool {
        self.from.id == user_id
    }
}

/// Opaque token pointing at the next older page. In practice the backend hands
/// out a fully qualified URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<PageCursor>,
}

/// One page of history, newest message first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub data: Vec<Message>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl MessagePage {
    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.clone())
            .filter(|c| !c.as_str().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationThread {
    pub id: String,
    pub messages: MessagePage,
}

/// The newest-page endpoint answers either with a bare page or with the page
/// nested inside a conversation thread list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NewestPage {
    Threaded { data: Vec<ConversationThread> },
    Flat(MessagePage),
}

impl NewestPage {
    pub fn into_page(self) -> MessagePage {
        match self {
            NewestPage::Threaded { data } => data
                .into_iter()
                .next()
                .map(|thread| thread.messages)
                .unwrap_or_default(),
            NewestPage::Flat(page) => page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PictureData {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub data: PictureData,
}

/// A counter-party that has a conversation with the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<Picture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<PageUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
}

/// Acknowledgement for a sent message. The backend echoes the platform
/// response, of which only the identifiers are interesting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendAck {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

// ── Live events (push) ───────────────────────────────────────────────────────

/// The push event kinds this subsystem understands. Wire names are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PageSentMessage,
    UserSentMessage,
    NotificationUserSentMessage,
    NotificationUserSentComment,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::PageSentMessage,
        EventKind::UserSentMessage,
        EventKind::NotificationUserSentMessage,
        EventKind::NotificationUserSentComment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageSentMessage => "page-sent-message",
            EventKind::UserSentMessage => "user-sent-message",
            EventKind::NotificationUserSentMessage => "notification-user-sent-message",
            EventKind::NotificationUserSentComment => "notification-user-sent-comment",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    OperatorSent,
    CounterpartySent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LiveMessageRefs {
    pub message_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessagePayload {
    #[serde(default)]
    pub user_text: String,
    pub data: LiveMessageRefs,
    #[serde(default)]
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    pub origin: MessageOrigin,
    pub payload: LiveMessagePayload,
}

impl ConversationEvent {
    /// The counter-party this message belongs to, if the payload names one.
    pub fn conversation_id(&self) -> Option<&str> {
        match self.origin {
            MessageOrigin::OperatorSent => Some(self.payload.data.recipient_id.as_str()),
            MessageOrigin::CounterpartySent => self
                .payload
                .sender_id
                .as_deref()
                .or(self.payload.data.sender_id.as_deref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageNotice {
    pub sender_id: String,
    #[serde(default)]
    pub user_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentNotice {
    pub user_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub comment_text: String,
    #[serde(default)]
    pub post_id: Option<String>,
}

impl NewCommentNotice {
    /// Whose comments the alert leads to: the sender when named, else the user.
    pub fn author(&self) -> &str {
        self.sender_id.as_deref().unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    NewMessage(NewMessageNotice),
    NewComment(NewCommentNotice),
}

/// A decoded push event. Closed: anything else is dead-lettered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Conversation(ConversationEvent),
    Notification(NotificationEvent),
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LiveEvent::Conversation(ev) => match ev.origin {
                MessageOrigin::OperatorSent => EventKind::PageSentMessage,
                MessageOrigin::CounterpartySent => EventKind::UserSentMessage,
            },
            LiveEvent::Notification(NotificationEvent::NewMessage(_)) => {
                EventKind::NotificationUserSentMessage
            }
            LiveEvent::Notification(NotificationEvent::NewComment(_)) => {
                EventKind::NotificationUserSentComment
            }
        }
    }

    /// Decodes a named wire event. Unknown names and malformed payloads are
    /// returned as errors so the caller can dead-letter them.
    pub fn from_wire(name: &str, payload: Value) -> Result<Self, String> {
        let kind = EventKind::from_wire(name).ok_or_else(|| format!("unknown event kind '{name}'"))?;
        let bad = |e: serde_json::Error| format!("malformed '{name}' payload: {e}");
        let event = match kind {
            EventKind::PageSentMessage => LiveEvent::Conversation(ConversationEvent {
                origin: MessageOrigin::OperatorSent,
                payload: serde_json::from_value(payload).map_err(bad)?,
            }),
            EventKind::UserSentMessage => LiveEvent::Conversation(ConversationEvent {
                origin: MessageOrigin::CounterpartySent,
                payload: serde_json::from_value(payload).map_err(bad)?,
            }),
            EventKind::NotificationUserSentMessage => LiveEvent::Notification(
                NotificationEvent::NewMessage(serde_json::from_value(payload).map_err(bad)?),
            ),
            EventKind::NotificationUserSentComment => LiveEvent::Notification(
                NotificationEvent::NewComment(serde_json::from_value(payload).map_err(bad)?),
            ),
        };
        Ok(event)
    }
}

/// Platform timestamps come as `2024-05-01T10:00:00+0000`, which is not quite
/// RFC 3339, so both spellings are accepted.
pub(crate) mod graph_time {
    use chrono::{DateTime, ParseError, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, ParseError> {
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format("%Y-%m-%dT%H:%M:%S%z").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_accepts_platform_timestamps() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m_1",
            "created_time": "2024-05-01T10:00:00+0000",
            "from": { "id": "42", "name": "Ana", "email": "ana@example.com" },
            "to": { "data": [{ "id": "page", "name": "Shop" }] },
            "message": "hello"
        }))
        .unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.created_time.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(msg.is_from("42"));
        assert_eq!(msg.to.data[0].id, "page");
    }

    #[test]
    fn newest_page_reads_threaded_and_flat_shapes() {
        let threaded: NewestPage = serde_json::from_value(json!({
            "data": [{
                "id": "t_1",
                "messages": {
                    "data": [{ "id": "m", "created_time": "2024-05-01T10:00:00+0000",
                               "from": { "id": "42" }, "message": "hi" }],
                    "paging": { "cursors": { "before": "a", "after": "b" }, "next": "url2" }
                }
            }]
        }))
        .unwrap();
        let page = threaded.into_page();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_cursor(), Some(PageCursor::new("url2")));

        let flat: NewestPage = serde_json::from_value(json!({
            "data": [{ "id": "m", "created_time": "2024-05-01T10:00:00+00:00",
                       "from": { "id": "42" }, "message": "hi" }],
            "paging": { "next": "url3" }
        }))
        .unwrap();
        assert_eq!(flat.into_page().next_cursor(), Some(PageCursor::new("url3")));
    }

    #[test]
    fn missing_or_empty_next_means_no_older_page() {
        let page: MessagePage = serde_json::from_value(json!({ "data": [], "paging": { "next": "" } })).unwrap();
        assert_eq!(page.next_cursor(), None);
        let page: MessagePage = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert_eq!(page.next_cursor(), None);
    }

    #[test]
    fn live_events_decode_by_wire_name() {
        let sent = LiveEvent::from_wire(
            "page-sent-message",
            json!({ "userText": "on its way", "data": { "message_id": "m9", "recipient_id": "42" } }),
        )
        .unwrap();
        assert_eq!(sent.kind(), EventKind::PageSentMessage);
        match &sent {
            LiveEvent::Conversation(ev) => assert_eq!(ev.conversation_id(), Some("42")),
            other => panic!("unexpected {other:?}"),
        }

        let received = LiveEvent::from_wire(
            "user-sent-message",
            json!({ "userText": "thanks", "senderId": "42",
                    "data": { "message_id": "m10", "recipient_id": "page" } }),
        )
        .unwrap();
        match &received {
            LiveEvent::Conversation(ev) => assert_eq!(ev.conversation_id(), Some("42")),
            other => panic!("unexpected {other:?}"),
        }

        let comment = LiveEvent::from_wire(
            "notification-user-sent-comment",
            json!({ "userId": "7", "commentText": "nice", "postId": "p1" }),
        )
        .unwrap();
        assert_eq!(comment.kind(), EventKind::NotificationUserSentComment);
    }

    #[test]
    fn comment_notice_carries_both_user_and_sender_ids() {
        let comment = LiveEvent::from_wire(
            "notification-user-sent-comment",
            json!({ "userId": "7", "senderId": "8", "commentText": "nice", "postId": "p1" }),
        )
        .unwrap();
        match comment {
            LiveEvent::Notification(NotificationEvent::NewComment(notice)) => {
                assert_eq!(notice.user_id, "7");
                assert_eq!(notice.sender_id.as_deref(), Some("8"));
                assert_eq!(notice.author(), "8");
                assert_eq!(notice.post_id.as_deref(), Some("p1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_or_malformed_events_are_rejected() {
        assert!(LiveEvent::from_wire("page-typing", json!({})).is_err());
        assert!(LiveEvent::from_wire("notification-user-sent-message", json!({ "userText": "x" })).is_err());
    }

    #[test]
    fn counterparty_message_without_sender_has_no_conversation() {
        let ev = LiveEvent::from_wire(
            "user-sent-message",
            json!({ "userText": "hi", "data": { "message_id": "m", "recipient_id": "page" } }),
        )
        .unwrap();
        match ev {
            LiveEvent::Conversation(ev) => assert_eq!(ev.conversation_id(), None),
            other => panic!("unexpected {other:?}"),
        }
    }
}
