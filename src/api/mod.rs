pub mod client;
pub mod events;
pub mod memory;
pub mod models;
pub mod query;
pub mod values;

use crate::api::events::Subscription;
use crate::api::models::AuthUser;
use crate::api::query::{Document, Fields, Query};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser>;
    async fn sign_out(&self) -> Result<()>;
    fn current_user(&self) -> Option<AuthUser>;
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;

    /// Long-lived token worth persisting so the session survives restarts.
    fn session_token(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    /// Batched point reads. Ids with no document are left out of the result.
    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>>;
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;
    /// Merges `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>>;
    fn subscribe(&self, query: Query) -> Subscription;
}

/// Handle on the hosted backend, passed to every screen that needs it.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthBackend>,
    pub store: Arc<dyn DocumentStore>,
}

impl Backend {
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: AuthBackend + DocumentStore + 'static,
    {
        Self {
            auth: backend.clone(),
            store: backend,
        }
    }
}
