use crate::api::DocumentStore;
use crate::api::events::{Snapshot, Subscription};
use crate::api::models::{
    AuthUser, CHATS, FIELD_LAST_MESSAGE, FIELD_LAST_MESSAGE_AT, FIELD_TIMESTAMP, Message,
    messages_path,
};
use crate::api::query::{Direction, FieldValue, Fields, Query};
use crate::error::{ChatError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct MessageBubble {
    pub id: String,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub outgoing: bool,
}

pub fn messages_query(chat_id: &str) -> Query {
    Query::collection(messages_path(chat_id)).order_by(FIELD_TIMESTAMP, Direction::Ascending)
}

/// Maps a snapshot to bubbles in ascending timestamp order.
pub fn bubbles(snapshot: &Snapshot, me: &AuthUser) -> Vec<MessageBubble> {
    let mut out: Vec<MessageBubble> = snapshot
        .documents
        .iter()
        .filter_map(|doc| match Message::from_document(doc) {
            Ok(msg) => Some(MessageBubble {
                outgoing: msg.is_from(me),
                id: msg.id,
                text: msg.text,
                sender: msg.sender,
                timestamp: msg.timestamp,
            }),
            Err(e) => {
                log::warn!("skipping message: {e}");
                None
            }
        })
        .collect();
    out.sort_by_key(|b| b.timestamp);
    out
}

/// Live view of one conversation's messages.
pub struct MessageFeed {
    me: AuthUser,
    subscription: Subscription,
    composer: Composer,
}

impl MessageFeed {
    pub fn open(store: Arc<dyn DocumentStore>, me: AuthUser, chat_id: &str) -> Result<Self> {
        if chat_id.trim().is_empty() {
            log::error!("cannot open a message feed without a chat id");
            return Err(ChatError::MissingChatId);
        }
        let subscription = store.subscribe(messages_query(chat_id));
        Ok(Self {
            composer: Composer::new(store, me.clone(), chat_id),
            me,
            subscription,
        })
    }

    pub async fn next(&mut self) -> Option<Result<Vec<MessageBubble>>> {
        let event = self.subscription.next().await?;
        Some(event.map(|snapshot| bubbles(&snapshot, &self.me)))
    }

    pub fn composer(&self) -> Composer {
        self.composer.clone()
    }
}

/// Draft state plus the send action for one conversation.
#[derive(Clone)]
pub struct Composer {
    store: Arc<dyn DocumentStore>,
    me: AuthUser,
    chat_id: String,
    draft: String,
}

impl Composer {
    pub fn new(store: Arc<dyn DocumentStore>, me: AuthUser, chat_id: &str) -> Self {
        Self {
            store,
            me,
            chat_id: chat_id.to_string(),
            draft: String::new(),
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    /// Sends the draft. Blank drafts are ignored; the draft is only cleared
    /// once the message is stored.
    pub async fn send(&mut self) -> Result<Option<String>> {
        let id = post_message(self.store.as_ref(), &self.me, &self.chat_id, &self.draft).await?;
        if id.is_some() {
            self.draft.clear();
        }
        Ok(id)
    }
}

/// Stores one message and refreshes the chat's preview fields. Returns the new
/// message id, or `None` when `text` is blank.
pub async fn post_message(
    store: &dyn DocumentStore,
    me: &AuthUser,
    chat_id: &str,
    text: &str,
) -> Result<Option<String>> {
    if chat_id.trim().is_empty() {
        log::error!("cannot send a message without a chat id");
        return Err(ChatError::MissingChatId);
    }
    if text.trim().is_empty() {
        return Ok(None);
    }
    let now = Utc::now();
    let id = store
        .add(&messages_path(chat_id), Message::new_fields(&me.uid, text, now))
        .await?;
    let preview = Fields::from([
        (FIELD_LAST_MESSAGE.to_string(), FieldValue::from(text)),
        (FIELD_LAST_MESSAGE_AT.to_string(), FieldValue::from(now)),
    ]);
    if let Err(e) = store.update(CHATS, chat_id, preview).await {
        // The message itself is stored; only the list preview is behind.
        log::warn!("could not update preview of chat {chat_id}: {e}");
    }
    Ok(Some(id))
}
