use crate::api::AuthBackend;
use crate::api::models::AuthUser;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    SignedOut,
    SignedIn(AuthUser),
}

impl From<Option<AuthUser>> for SessionView {
    fn from(user: Option<AuthUser>) -> Self {
        match user {
            Some(user) => SessionView::SignedIn(user),
            None => SessionView::SignedOut,
        }
    }
}

/// The user whose local state goes stale when `next` follows `previous`.
/// A sign-out merged with another user's sign-in still counts.
pub fn departed<'a>(previous: Option<&'a AuthUser>, next: &SessionView) -> Option<&'a AuthUser> {
    let previous = previous?;
    match next {
        SessionView::SignedIn(user) if user.uid == previous.uid => None,
        _ => Some(previous),
    }
}

/// Decides which page the window shows by following the auth state.
pub struct SessionGate {
    rx: watch::Receiver<Option<AuthUser>>,
    last_seen: SessionView,
}

impl SessionGate {
    pub fn new(auth: &dyn AuthBackend) -> Self {
        let mut rx = auth.watch();
        let last_seen = rx.borrow_and_update().clone().into();
        Self { rx, last_seen }
    }

    pub fn current(&self) -> SessionView {
        self.last_seen.clone()
    }

    /// Waits for the next sign-in or sign-out. `None` once the backend is gone.
    pub async fn changed(&mut self) -> Option<SessionView> {
        loop {
            self.rx.changed().await.ok()?;
            let next: SessionView = self.rx.borrow_and_update().clone().into();
            // Signing in again as the same user is not a transition.
            if next != self.last_seen {
                self.last_seen = next.clone();
                return Some(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;

    #[tokio::test]
    async fn gate_follows_sign_in_and_sign_out() {
        let backend = MemoryBackend::new();
        let mut gate = SessionGate::new(&backend);
        assert_eq!(gate.current(), SessionView::SignedOut);

        let user = backend.sign_up("a@x.io", "secret1").await.unwrap();
        assert_eq!(gate.changed().await, Some(SessionView::SignedIn(user.clone())));
        assert_eq!(gate.current(), SessionView::SignedIn(user));

        backend.sign_out().await.unwrap();
        assert_eq!(gate.changed().await, Some(SessionView::SignedOut));
    }

    #[test]
    fn switching_users_departs_the_previous_one() {
        let a = AuthUser::new("a", "a@x.io");
        let b = AuthUser::new("b", "b@x.io");
        assert_eq!(departed(None, &SessionView::SignedIn(a.clone())), None);
        assert_eq!(departed(Some(&a), &SessionView::SignedIn(a.clone())), None);
        assert_eq!(departed(Some(&a), &SessionView::SignedIn(b)), Some(&a));
        assert_eq!(departed(Some(&a), &SessionView::SignedOut), Some(&a));
    }

    #[tokio::test]
    async fn repeated_sign_in_is_not_a_transition() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.io", "secret1").await.unwrap();
        let mut gate = SessionGate::new(&backend);
        backend.sign_in("a@x.io", "secret1").await.unwrap();
        backend.sign_out().await.unwrap();
        assert_eq!(gate.changed().await, Some(SessionView::SignedOut));
    }
}
