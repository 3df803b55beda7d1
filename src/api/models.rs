use crate::api::query::{Document, FieldValue, Fields};
use crate::error::{ChatError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";

pub const FIELD_EMAIL: &str = "email";
pub const FIELD_USERNAME: &str = "username";
pub const FIELD_PARTICIPANTS: &str = "participants";
pub const FIELD_LAST_MESSAGE: &str = "lastMessage";
pub const FIELD_LAST_MESSAGE_AT: &str = "lastMessageAt";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_SENDER: &str = "sender";
pub const FIELD_TIMESTAMP: &str = "timestamp";

pub fn messages_path(chat_id: &str) -> String {
    format!("{CHATS}/{chat_id}/messages")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
}

impl UserProfile {
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(Self {
            id: doc.id.clone(),
            email: required_str(doc, FIELD_EMAIL)?,
            username: doc.get_str(FIELD_USERNAME).unwrap_or_default().to_string(),
        })
    }

    pub fn to_fields(&self) -> Fields {
        Fields::from([
            (FIELD_EMAIL.to_string(), FieldValue::from(self.email.as_str())),
            (FIELD_USERNAME.to_string(), FieldValue::from(self.username.as_str())),
        ])
    }

    pub fn display_name(&self) -> &str {
        if self.username.is_empty() { &self.email } else { &self.username }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let participants = doc
            .get(FIELD_PARTICIPANTS)
            .and_then(FieldValue::as_array)
            .ok_or_else(|| ChatError::decode(&doc.id, "participants is not an array"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ChatError::decode(&doc.id, "participant is not a string"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: doc.id.clone(),
            participants,
            last_message: doc.get_str(FIELD_LAST_MESSAGE).map(str::to_string),
            last_message_at: doc.get(FIELD_LAST_MESSAGE_AT).and_then(FieldValue::as_timestamp),
        })
    }

    pub fn new_fields(participants: &[&str]) -> Fields {
        Fields::from([(
            FIELD_PARTICIPANTS.to_string(),
            FieldValue::Array(participants.iter().map(|p| FieldValue::from(*p)).collect()),
        )])
    }

    /// The participant that is not `me`.
    pub fn counterparty(&self, me: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != me)
    }

    pub fn is_pair(&self, a: &str, b: &str) -> bool {
        self.participants.len() == 2
            && self.participants.iter().any(|p| p == a)
            && self.participants.iter().any(|p| p == b)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(Self {
            id: doc.id.clone(),
            sender: required_str(doc, FIELD_SENDER)?,
            text: required_str(doc, FIELD_TEXT)?,
            timestamp: doc
                .get(FIELD_TIMESTAMP)
                .and_then(FieldValue::as_timestamp)
                .ok_or_else(|| ChatError::decode(&doc.id, "timestamp is missing"))?,
        })
    }

    pub fn new_fields(sender: &str, text: &str, timestamp: DateTime<Utc>) -> Fields {
        Fields::from([
            (FIELD_SENDER.to_string(), FieldValue::from(sender)),
            (FIELD_TEXT.to_string(), FieldValue::from(text)),
            (FIELD_TIMESTAMP.to_string(), FieldValue::from(timestamp)),
        ])
    }

    /// Older clients stored the sender's email instead of the user id.
    pub fn is_from(&self, user: &AuthUser) -> bool {
        self.sender == user.uid || (!user.email.is_empty() && self.sender == user.email)
    }
}

/// One entry of the conversation list, already resolved for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub chat_id: String,
    pub counterparty_id: String,
    pub title: String,
    pub preview: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

fn required_str(doc: &Document, field: &str) -> Result<String> {
    doc.get_str(field)
        .map(str::to_string)
        .ok_or_else(|| ChatError::decode(&doc.id, format!("{field} is missing")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_is_the_other_participant() {
        let chat = Conversation {
            id: "c".into(),
            participants: vec!["me".into(), "you".into()],
            last_message: None,
            last_message_at: None,
        };
        assert_eq!(chat.counterparty("me"), Some("you"));
        assert_eq!(chat.counterparty("you"), Some("me"));
        assert!(chat.is_pair("you", "me"));
        assert!(!chat.is_pair("me", "them"));
    }

    #[test]
    fn conversation_rejects_non_array_participants() {
        let doc = Document::new(
            "c1",
            Fields::from([(FIELD_PARTICIPANTS.to_string(), FieldValue::from("me"))]),
        );
        assert!(matches!(
            Conversation::from_document(&doc),
            Err(ChatError::Decode { .. })
        ));
    }

    #[test]
    fn legacy_email_sender_still_counts_as_own_message() {
        let me = AuthUser::new("uid-1", "me@x.io");
        let mut msg = Message {
            id: "m".into(),
            sender: "me@x.io".into(),
            text: "hi".into(),
            timestamp: Utc::now(),
        };
        assert!(msg.is_from(&me));
        msg.sender = "uid-1".into();
        assert!(msg.is_from(&me));
        msg.sender = "uid-2".into();
        assert!(!msg.is_from(&me));
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let profile = UserProfile {
            id: "u".into(),
            email: "a@x.io".into(),
            username: String::new(),
        };
        assert_eq!(profile.display_name(), "a@x.io");
    }
}
