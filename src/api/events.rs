use crate::api::models::AuthUser;
use crate::api::query::Document;
use crate::error::Result;
use tokio::sync::{mpsc, watch};

/// Full result set of a live query at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

pub type SnapshotEvent = Result<Snapshot>;

/// Scoped handle on a live query. The subscription is released when the
/// handle is dropped or cancelled, whichever happens first.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<SnapshotEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            release: Some(Box::new(release)),
        }
    }

    /// Next snapshot, or `None` once the backend has closed the channel.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Current auth user plus a channel observers can watch for changes.
#[derive(Debug)]
pub struct AuthState {
    tx: watch::Sender<Option<AuthUser>>,
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, user: Option<AuthUser>) {
        self.tx.send_replace(user);
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn dropping_subscription_runs_release_once() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(rx, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        tx.send(Ok(Snapshot::default())).unwrap();
        assert!(sub.next().await.unwrap().is_ok());
        drop(sub);
        assert!(released.load(Ordering::SeqCst));
        assert!(tx.is_closed());
    }

    #[test]
    fn auth_state_notifies_watchers() {
        let state = AuthState::new();
        let rx = state.watch();
        assert!(state.current().is_none());
        state.set(Some(AuthUser::new("u1", "a@x.io")));
        assert_eq!(rx.borrow().as_ref().map(|u| u.uid.as_str()), Some("u1"));
    }
}
