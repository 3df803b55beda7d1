use crate::api::events::{AuthState, Snapshot, SnapshotEvent, Subscription};
use crate::api::models::AuthUser;
use crate::api::query::{Document, Fields, Query};
use crate::api::{AuthBackend, DocumentStore};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};

const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    uid: String,
    email: String,
    password: String,
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    last: Vec<Document>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    accounts: HashMap<String, Account>,
    listeners: HashMap<u64, Listener>,
    next_listener: u64,
}

impl Inner {
    fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn evaluate(&self, query: &Query) -> Vec<Document> {
        query.apply(self.documents(&query.collection))
    }

    fn notify(&mut self, collection: &str) {
        let mut changed = Vec::new();
        for (id, listener) in &self.listeners {
            if listener.query.collection != collection {
                continue;
            }
            let docs = self.evaluate(&listener.query);
            if docs != listener.last {
                changed.push((*id, docs));
            }
        }
        for (id, docs) in changed {
            if let Some(listener) = self.listeners.get_mut(&id) {
                let sent = listener.tx.send(Ok(Snapshot {
                    documents: docs.clone(),
                }));
                if sent.is_err() {
                    self.listeners.remove(&id);
                } else {
                    listener.last = docs;
                }
            }
        }
    }
}

/// In-process backend: accounts, collections and live queries held in memory.
/// Writes fan out to matching subscriptions before the write call returns.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    auth: AuthState,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    #[cfg(test)]
    pub fn document_count(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = {
            let inner = self.lock();
            let account = inner
                .accounts
                .get(&email.trim().to_lowercase())
                .ok_or_else(|| ChatError::Backend("EMAIL_NOT_FOUND".into()))?;
            if account.password != password {
                return Err(ChatError::Backend("INVALID_PASSWORD".into()));
            }
            AuthUser::new(account.uid.clone(), account.email.clone())
        };
        self.auth.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let key = email.trim().to_lowercase();
        if key.is_empty() || !key.contains('@') {
            return Err(ChatError::Backend("INVALID_EMAIL".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(ChatError::Backend(
                "WEAK_PASSWORD : Password should be at least 6 characters".into(),
            ));
        }
        let user = {
            let mut inner = self.lock();
            if inner.accounts.contains_key(&key) {
                return Err(ChatError::Backend("EMAIL_EXISTS".into()));
            }
            let uid = uuid::Uuid::new_v4().simple().to_string();
            inner.accounts.insert(
                key.clone(),
                Account {
                    uid: uid.clone(),
                    email: key.clone(),
                    password: password.to_string(),
                },
            );
            AuthUser::new(uid, key)
        };
        self.auth.set(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        self.auth.set(None);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.auth.current()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.auth.watch()
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.lock();
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>> {
        let inner = self.lock();
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|f| Document::new(id.clone(), f.clone())))
            .collect())
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        inner.notify(collection);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set(collection, &id, fields).await?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut inner = self.lock();
        let existing = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| ChatError::Backend(format!("NOT_FOUND: No document to update: {collection}/{id}")))?;
        existing.extend(fields);
        inner.notify(collection);
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.lock().evaluate(query))
    }

    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            let docs = inner.evaluate(&query);
            let _ = tx.send(Ok(Snapshot {
                documents: docs.clone(),
            }));
            inner.listeners.insert(
                id,
                Listener {
                    query,
                    tx,
                    last: docs,
                },
            );
            id
        };
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.listeners.remove(&id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::query::FieldValue;

    fn name(n: &str) -> Fields {
        Fields::from([("name".to_string(), FieldValue::from(n))])
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_with_firebase_style_errors() {
        let backend = MemoryBackend::new();
        let err = backend.sign_up("a@x.io", "123").await.unwrap_err();
        assert!(err.to_string().starts_with("WEAK_PASSWORD"));

        let user = backend.sign_up("A@x.io", "secret1").await.unwrap();
        assert_eq!(user.email, "a@x.io");
        assert_eq!(backend.current_user(), Some(user.clone()));

        let err = backend.sign_up("a@x.io", "secret1").await.unwrap_err();
        assert_eq!(err.to_string(), "EMAIL_EXISTS");

        backend.sign_out().await.unwrap();
        assert!(backend.current_user().is_none());

        let err = backend.sign_in("a@x.io", "wrong-pw").await.unwrap_err();
        assert_eq!(err.to_string(), "INVALID_PASSWORD");
        let err = backend.sign_in("b@x.io", "secret1").await.unwrap_err();
        assert_eq!(err.to_string(), "EMAIL_NOT_FOUND");
        assert_eq!(backend.sign_in("a@x.io", "secret1").await.unwrap(), user);
    }

    #[tokio::test]
    async fn subscription_sees_initial_state_and_changes_only() {
        let backend = MemoryBackend::new();
        backend.set("things", "a", name("one")).await.unwrap();

        let mut sub = backend.subscribe(Query::collection("things"));
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.documents.len(), 1);

        // A write to another collection produces nothing.
        backend.set("other", "x", name("x")).await.unwrap();
        backend.update("things", "a", name("uno")).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.documents[0].get_str("name"), Some("uno"));
    }

    #[tokio::test]
    async fn dropping_subscription_removes_listener() {
        let backend = MemoryBackend::new();
        let sub = backend.subscribe(Query::collection("things"));
        assert_eq!(backend.listener_count(), 1);
        drop(sub);
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn get_many_skips_missing_ids_and_update_requires_document() {
        let backend = MemoryBackend::new();
        backend.set("users", "u1", name("one")).await.unwrap();
        let docs = backend
            .get_many("users", &["u1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(backend.update("users", "nope", name("x")).await.is_err());
    }
}
