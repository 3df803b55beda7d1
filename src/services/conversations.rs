use crate::api::DocumentStore;
use crate::api::events::{Snapshot, Subscription};
use crate::api::models::{
    AuthUser, CHATS, Conversation, ConversationRow, FIELD_PARTICIPANTS, USERS, UserProfile,
};
use crate::api::query::{Document, Query};
use crate::error::{ChatError, Result};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub const UNKNOWN_USER: &str = "Unknown user";
pub const NO_MESSAGES: &str = "No messages yet";

pub fn conversations_query(uid: &str) -> Query {
    Query::collection(CHATS).where_array_contains(FIELD_PARTICIPANTS, uid)
}

/// Live list of the signed-in user's conversations, resolved for display.
pub struct ConversationList {
    store: Arc<dyn DocumentStore>,
    me: AuthUser,
    subscription: Subscription,
}

impl ConversationList {
    pub fn open(store: Arc<dyn DocumentStore>, me: AuthUser) -> Self {
        let subscription = store.subscribe(conversations_query(&me.uid));
        Self {
            store,
            me,
            subscription,
        }
    }

    /// Waits for the next snapshot and resolves it into rows. A snapshot that
    /// lands while the previous one is still being resolved replaces it; an
    /// error in that window is logged and the pending snapshot still resolves.
    pub async fn next(&mut self) -> Option<Result<Vec<ConversationRow>>> {
        let mut pending = match self.subscription.next().await? {
            Ok(snapshot) => snapshot,
            Err(e) => return Some(Err(e)),
        };
        loop {
            let store = self.store.clone();
            let uid = self.me.uid.clone();
            let snapshot = pending.clone();
            let resolve = async move { resolve_rows(store.as_ref(), &uid, &snapshot).await };
            tokio::select! {
                rows = resolve => return Some(Ok(rows)),
                newer = self.subscription.next() => match newer? {
                    Ok(snapshot) => {
                        log::debug!("conversation snapshot superseded before it was resolved");
                        pending = snapshot;
                    }
                    Err(e) => log::warn!("conversation query failed while resolving rows: {e}"),
                },
            }
        }
    }
}

/// Turns one snapshot into display rows with a single batched profile read.
pub async fn resolve_rows(
    store: &dyn DocumentStore,
    me: &str,
    snapshot: &Snapshot,
) -> Vec<ConversationRow> {
    let chats: Vec<Conversation> = snapshot
        .documents
        .iter()
        .filter_map(|doc| match Conversation::from_document(doc) {
            Ok(chat) => Some(chat),
            Err(e) => {
                log::warn!("skipping conversation: {e}");
                None
            }
        })
        .collect();

    let ids: Vec<String> = chats
        .iter()
        .filter_map(|chat| chat.counterparty(me))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let names = match store.get_many(USERS, &ids).await {
        Ok(docs) => display_names(&docs),
        Err(e) => {
            log::warn!("could not resolve {} participant profiles: {e}", ids.len());
            HashMap::new()
        }
    };

    let mut rows: Vec<ConversationRow> = chats
        .into_iter()
        .map(|chat| {
            let counterparty_id = chat.counterparty(me).unwrap_or_default().to_string();
            let title = names
                .get(&counterparty_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_USER.to_string());
            ConversationRow {
                chat_id: chat.id,
                counterparty_id,
                title,
                preview: chat
                    .last_message
                    .unwrap_or_else(|| NO_MESSAGES.to_string()),
                last_message_at: chat.last_message_at,
            }
        })
        .collect();
    rows.sort_by(order_rows);
    rows
}

fn display_names(docs: &[Document]) -> HashMap<String, String> {
    docs.iter()
        .filter_map(|doc| UserProfile::from_document(doc).ok())
        .map(|profile| (profile.id.clone(), profile.display_name().to_string()))
        .collect()
}

/// Most recent activity first; idle chats after, by id.
pub fn order_rows(a: &ConversationRow, b: &ConversationRow) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.chat_id.cmp(&b.chat_id))
}

/// Finds the two-party conversation between `me` and `recipient`, creating it
/// when there is none yet.
pub async fn open_or_create_chat(
    store: &dyn DocumentStore,
    me: &str,
    recipient: &str,
) -> Result<String> {
    if me == recipient {
        return Err(ChatError::InvalidInput(
            "You cannot start a chat with yourself".into(),
        ));
    }
    let existing = store.run_query(&conversations_query(me)).await?;
    for doc in &existing {
        match Conversation::from_document(doc) {
            Ok(chat) if chat.is_pair(me, recipient) => return Ok(chat.id),
            Ok(_) => {}
            Err(e) => log::warn!("skipping conversation: {e}"),
        }
    }
    let id = store
        .add(CHATS, Conversation::new_fields(&[me, recipient]))
        .await?;
    log::info!("created chat {id}");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;
    use crate::api::models::{FIELD_LAST_MESSAGE, FIELD_LAST_MESSAGE_AT};
    use crate::api::query::{FieldValue, Fields};
    use crate::api::events::SnapshotEvent;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{Semaphore, mpsc};

    async fn add_user(store: &MemoryBackend, id: &str, username: &str) {
        let profile = UserProfile {
            id: id.into(),
            email: format!("{username}@x.io"),
            username: username.into(),
        };
        store.set(USERS, id, profile.to_fields()).await.unwrap();
    }

    async fn add_chat(store: &MemoryBackend, id: &str, pair: [&str; 2], last: Option<(&str, i64)>) {
        let mut fields = Conversation::new_fields(&pair);
        if let Some((text, secs)) = last {
            fields.insert(FIELD_LAST_MESSAGE.into(), FieldValue::from(text));
            fields.insert(
                FIELD_LAST_MESSAGE_AT.into(),
                FieldValue::Timestamp(Utc.timestamp_opt(secs, 0).unwrap()),
            );
        }
        store.set(CHATS, id, fields).await.unwrap();
    }

    #[tokio::test]
    async fn rows_name_the_other_participant_or_fall_back() {
        let store = Arc::new(MemoryBackend::new());
        add_user(&store, "me", "mina").await;
        add_user(&store, "u2", "bob").await;
        add_chat(&store, "c1", ["me", "u2"], Some(("hi bob", 100))).await;
        add_chat(&store, "c2", ["ghost", "me"], None).await;
        add_chat(&store, "c3", ["u2", "other"], None).await;

        let mut list = ConversationList::open(store.clone(), AuthUser::new("me", "mina@x.io"));
        let rows = list.next().await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].chat_id, "c1");
        assert_eq!(rows[0].title, "bob");
        assert_eq!(rows[0].preview, "hi bob");
        assert_eq!(rows[1].counterparty_id, "ghost");
        assert_eq!(rows[1].title, UNKNOWN_USER);
        assert_eq!(rows[1].preview, NO_MESSAGES);
    }

    #[tokio::test]
    async fn list_updates_when_a_chat_gets_a_message() {
        let store = Arc::new(MemoryBackend::new());
        add_user(&store, "u2", "bob").await;
        add_user(&store, "u3", "cy").await;
        add_chat(&store, "c1", ["me", "u2"], Some(("old", 100))).await;
        add_chat(&store, "c2", ["me", "u3"], Some(("older", 50))).await;

        let mut list = ConversationList::open(store.clone(), AuthUser::new("me", ""));
        let rows = list.next().await.unwrap().unwrap();
        assert_eq!(rows[0].chat_id, "c1");

        add_chat(&store, "c2", ["me", "u3"], Some(("new", 200))).await;
        let rows = list.next().await.unwrap().unwrap();
        assert_eq!(rows[0].chat_id, "c2");
        assert_eq!(rows[0].preview, "new");
    }

    struct FailingProfiles(MemoryBackend);

    #[async_trait]
    impl DocumentStore for FailingProfiles {
        async fn get(&self, c: &str, id: &str) -> Result<Option<Document>> {
            self.0.get(c, id).await
        }
        async fn get_many(&self, _: &str, _: &[String]) -> Result<Vec<Document>> {
            Err(ChatError::Backend("UNAVAILABLE".into()))
        }
        async fn set(&self, c: &str, id: &str, f: Fields) -> Result<()> {
            self.0.set(c, id, f).await
        }
        async fn add(&self, c: &str, f: Fields) -> Result<String> {
            self.0.add(c, f).await
        }
        async fn update(&self, c: &str, id: &str, f: Fields) -> Result<()> {
            self.0.update(c, id, f).await
        }
        async fn run_query(&self, q: &Query) -> Result<Vec<Document>> {
            self.0.run_query(q).await
        }
        fn subscribe(&self, q: Query) -> Subscription {
            self.0.subscribe(q)
        }
    }

    #[tokio::test]
    async fn failed_profile_read_uses_fallback_label() {
        let inner = MemoryBackend::new();
        add_user(&inner, "u2", "bob").await;
        add_chat(&inner, "c1", ["me", "u2"], None).await;
        let store = FailingProfiles(inner);
        let snapshot = Snapshot {
            documents: store.run_query(&conversations_query("me")).await.unwrap(),
        };
        let rows = resolve_rows(&store, "me", &snapshot).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, UNKNOWN_USER);
    }

    /// Profile reads wait for the gate; snapshots come from the test's sender.
    struct GatedProfiles {
        inner: MemoryBackend,
        gate: Arc<Semaphore>,
        events: Mutex<Option<mpsc::UnboundedReceiver<SnapshotEvent>>>,
    }

    impl GatedProfiles {
        fn new() -> (Self, mpsc::UnboundedSender<SnapshotEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let store = Self {
                inner: MemoryBackend::new(),
                gate: Arc::new(Semaphore::new(0)),
                events: Mutex::new(Some(rx)),
            };
            (store, tx)
        }
    }

    #[async_trait]
    impl DocumentStore for GatedProfiles {
        async fn get(&self, c: &str, id: &str) -> Result<Option<Document>> {
            self.inner.get(c, id).await
        }
        async fn get_many(&self, c: &str, ids: &[String]) -> Result<Vec<Document>> {
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.get_many(c, ids).await
        }
        async fn set(&self, c: &str, id: &str, f: Fields) -> Result<()> {
            self.inner.set(c, id, f).await
        }
        async fn add(&self, c: &str, f: Fields) -> Result<String> {
            self.inner.add(c, f).await
        }
        async fn update(&self, c: &str, id: &str, f: Fields) -> Result<()> {
            self.inner.update(c, id, f).await
        }
        async fn run_query(&self, q: &Query) -> Result<Vec<Document>> {
            self.inner.run_query(q).await
        }
        fn subscribe(&self, _: Query) -> Subscription {
            let rx = self.events.lock().unwrap().take().unwrap();
            Subscription::new(rx, || {})
        }
    }

    fn chat_doc(id: &str, peer: &str) -> Document {
        Document::new(id, Conversation::new_fields(&["me", peer]))
    }

    fn open_gate_later(gate: Arc<Semaphore>) {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.add_permits(16);
        });
    }

    #[tokio::test]
    async fn newer_snapshot_replaces_one_still_resolving() {
        let (store, tx) = GatedProfiles::new();
        add_user(&store.inner, "u2", "bob").await;
        add_user(&store.inner, "u3", "cy").await;
        let gate = store.gate.clone();
        let mut list = ConversationList::open(Arc::new(store), AuthUser::new("me", ""));

        tx.send(Ok(Snapshot {
            documents: vec![chat_doc("c1", "u2")],
        }))
        .unwrap();
        tx.send(Ok(Snapshot {
            documents: vec![chat_doc("c1", "u2"), chat_doc("c2", "u3")],
        }))
        .unwrap();
        open_gate_later(gate);

        let rows = tokio::time::timeout(Duration::from_secs(2), list.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.chat_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn query_error_while_resolving_keeps_pending_rows() {
        let (store, tx) = GatedProfiles::new();
        add_user(&store.inner, "u2", "bob").await;
        let gate = store.gate.clone();
        let mut list = ConversationList::open(Arc::new(store), AuthUser::new("me", ""));

        tx.send(Ok(Snapshot {
            documents: vec![chat_doc("c1", "u2")],
        }))
        .unwrap();
        tx.send(Err(ChatError::Backend("UNAVAILABLE".into()))).unwrap();
        open_gate_later(gate);

        let rows = tokio::time::timeout(Duration::from_secs(2), list.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chat_id, "c1");
        assert_eq!(rows[0].title, "bob");
    }

    #[tokio::test]
    async fn open_chat_reuses_existing_conversation() {
        let store = MemoryBackend::new();
        add_chat(&store, "c1", ["u2", "me"], None).await;
        let id = open_or_create_chat(&store, "me", "u2").await.unwrap();
        assert_eq!(id, "c1");
        assert_eq!(store.document_count(CHATS), 1);
    }

    #[tokio::test]
    async fn open_chat_creates_exactly_one_new_conversation() {
        let store = MemoryBackend::new();
        add_chat(&store, "c1", ["me", "u2"], None).await;
        let id = open_or_create_chat(&store, "me", "u3").await.unwrap();
        assert_ne!(id, "c1");
        assert_eq!(store.document_count(CHATS), 2);

        let doc = store.get(CHATS, &id).await.unwrap().unwrap();
        let chat = Conversation::from_document(&doc).unwrap();
        assert_eq!(chat.participants, vec!["me", "u3"]);
        assert_eq!(open_or_create_chat(&store, "u3", "me").await.unwrap(), id);

        assert!(open_or_create_chat(&store, "me", "me").await.is_err());
    }
}
