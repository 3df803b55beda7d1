use crate::api::client::{FirebaseClient, FirebaseConfig};
use crate::api::memory::MemoryBackend;
use crate::api::models::AuthUser;
use crate::api::Backend;
use crate::error::{ChatError, Result};
use crate::services::session::{SessionGate, SessionView, departed};
use crate::ui::main_window::MainPage;
use adw::prelude::*;
use adw::Application;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Firebase,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppState {
    pub backend: BackendKind,
    pub api_key: String,
    pub project_id: String,
    pub poll_interval_ms: u64,
    pub refresh_token: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            backend: BackendKind::Firebase,
            api_key: String::new(),
            project_id: String::new(),
            poll_interval_ms: 1500,
            refresh_token: None,
        }
    }
}

impl AppState {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("firechat.toml"))
    }

    /// File settings first, then `FIRECHAT_*` environment overrides.
    pub fn load() -> Self {
        let mut state = Self::toml_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|text| match Self::from_toml(&text) {
                Ok(state) => Some(state),
                Err(e) => {
                    log::warn!("ignoring unreadable config: {e}");
                    None
                }
            })
            .unwrap_or_default();
        state.apply_env(|key| std::env::var(key).ok());
        state
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ChatError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FIRECHAT_API_KEY") {
            self.api_key = key;
        }
        if let Some(project) = lookup("FIRECHAT_PROJECT_ID") {
            self.project_id = project;
        }
        match lookup("FIRECHAT_BACKEND").as_deref() {
            Some("memory") => self.backend = BackendKind::Memory,
            Some("firebase") => self.backend = BackendKind::Firebase,
            Some(other) => log::warn!("unknown FIRECHAT_BACKEND {other:?}"),
            None => {}
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| ChatError::Config("no config dir".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn firebase_config(&self) -> Option<FirebaseConfig> {
        if self.backend != BackendKind::Firebase
            || self.api_key.trim().is_empty()
            || self.project_id.trim().is_empty()
        {
            return None;
        }
        Some(FirebaseConfig {
            api_key: self.api_key.trim().to_string(),
            project_id: self.project_id.trim().to_string(),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(250)),
        })
    }
}

/// Builds the backend handle, restoring a saved session when there is one.
pub fn connect_backend(state: &mut AppState) -> Backend {
    let Some(config) = state.firebase_config() else {
        if state.backend == BackendKind::Firebase {
            log::warn!("Firebase api_key/project_id not set; using the in-memory backend");
        }
        return Backend::new(Arc::new(MemoryBackend::new()));
    };
    let client = match FirebaseClient::new(config, crate::utils::RUNTIME.handle().clone()) {
        Ok(client) => client,
        Err(e) => {
            log::error!("could not create Firebase client: {e}; using the in-memory backend");
            return Backend::new(Arc::new(MemoryBackend::new()));
        }
    };
    if let Some(token) = state.refresh_token.clone() {
        match crate::utils::RUNTIME.block_on(client.restore(&token)) {
            Ok(user) => log::info!("restored session for {}", user.uid),
            Err(e) => {
                log::warn!("saved session is no longer valid: {e}");
                state.refresh_token = None;
                if let Err(e) = state.save() {
                    log::warn!("could not save settings: {e}");
                }
            }
        }
    }
    Backend::new(Arc::new(client))
}

/// Owns the window and swaps its content whenever the session changes.
struct Shell {
    window: adw::ApplicationWindow,
    backend: Backend,
    state: RefCell<AppState>,
    page: RefCell<Option<MainPage>>,
    signed_in: RefCell<Option<AuthUser>>,
}

impl Shell {
    fn show(&self, view: SessionView) {
        // Dropping the old page releases its live queries.
        self.page.borrow_mut().take();
        let previous = self.signed_in.borrow_mut().take();
        if let Some(gone) = departed(previous.as_ref(), &view) {
            match crate::storage::open_default()
                .and_then(|conn| crate::storage::clear_owner(&conn, &gone.uid))
            {
                Ok(n) => log::debug!("cleared {n} cached rows of {}", gone.uid),
                Err(e) => log::warn!("could not clear cached rows: {e}"),
            }
        }
        match view {
            SessionView::SignedIn(user) => {
                self.persist_token(self.backend.auth.session_token());
                let page = MainPage::new(&self.window, &self.backend, user.clone());
                self.window.set_content(Some(&page.widget()));
                *self.page.borrow_mut() = Some(page);
                *self.signed_in.borrow_mut() = Some(user);
            }
            SessionView::SignedOut => {
                if previous.is_some() {
                    self.persist_token(None);
                }
                let page = crate::ui::login::build_login_page(&self.backend);
                self.window.set_content(Some(&page));
            }
        }
    }

    fn persist_token(&self, token: Option<String>) {
        let mut state = self.state.borrow_mut();
        if state.refresh_token == token {
            return;
        }
        state.refresh_token = token;
        if let Err(e) = state.save() {
            log::warn!("could not save settings: {e}");
        }
    }
}

pub fn build_ui(app: &Application, backend: Backend, state: AppState) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Firechat")
        .default_width(960)
        .default_height(640)
        .build();

    let mut gate = SessionGate::new(backend.auth.as_ref());
    let shell = Rc::new(Shell {
        window: window.clone(),
        backend,
        state: RefCell::new(state),
        page: RefCell::new(None),
        signed_in: RefCell::new(None),
    });
    shell.show(gate.current());

    let (tx, rx) = crate::utils::glib_channel::<SessionView>();
    crate::utils::spawn_async(async move {
        while let Some(view) = gate.changed().await {
            if tx.send(view).is_err() {
                break;
            }
        }
    });
    rx.attach(None, move |view| {
        shell.show(view);
        glib::ControlFlow::Continue
    });

    window.present();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_uses_defaults() {
        let state = AppState::from_toml("project_id = \"demo\"\nbackend = \"memory\"\n").unwrap();
        assert_eq!(state.project_id, "demo");
        assert_eq!(state.backend, BackendKind::Memory);
        assert_eq!(state.poll_interval_ms, 1500);
        assert!(state.refresh_token.is_none());
        assert!(state.firebase_config().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut state = AppState::from_toml("api_key = \"file\"").unwrap();
        state.apply_env(|key| match key {
            "FIRECHAT_API_KEY" => Some("env".to_string()),
            "FIRECHAT_PROJECT_ID" => Some("proj".to_string()),
            _ => None,
        });
        let config = state.firebase_config().unwrap();
        assert_eq!(config.api_key, "env");
        assert_eq!(config.project_id, "proj");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
    }

    #[test]
    fn state_round_trips_through_toml() {
        let state = AppState {
            refresh_token: Some("tok".into()),
            ..AppState::default()
        };
        let text = toml::to_string_pretty(&state).unwrap();
        assert_eq!(AppState::from_toml(&text).unwrap(), state);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            AppState::from_toml("poll_interval_ms = \"soon\""),
            Err(ChatError::Config(_))
        ));
    }
}
