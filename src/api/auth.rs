use tokio::sync::{watch, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Active(Credentials),
    Expired,
}

/// Credentials for one signed-in session, shared by every component that
/// talks to the backend. Observers learn about refreshes and expiry through
/// [`AuthSession::subscribe`].
pub struct AuthSession {
    state: watch::Sender<AuthState>,
    refresh_lock: Mutex<()>,
}

impl AuthSession {
    pub fn new(credentials: Credentials) -> Self {
        let (state, _) = watch::channel(AuthState::Active(credentials));
        Self {
            state,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        match &*self.state.borrow() {
            AuthState::Active(c) => Some(c.access_token.clone()),
            AuthState::Expired => None,
        }
    }

    #[cfg(test)]
    pub fn is_expired(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Expired)
    }

    pub fn update(&self, credentials: Credentials) {
        self.state.send_replace(AuthState::Active(credentials));
    }

    pub fn expire(&self) {
        self.state.send_replace(AuthState::Expired);
    }

    /// Held for the whole duration of a refresh call.
    pub(super) async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }
}
