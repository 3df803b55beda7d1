use crate::api::Backend;
use crate::api::models::{AuthUser, FIELD_USERNAME, USERS, UserProfile};
use crate::api::query::Query;
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    SignUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthField {
    Identifier,
    Email,
    Username,
    Password,
}

/// Validated input ready for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Login { identifier: String, password: String },
    SignUp { email: String, username: String, password: String },
}

/// State behind the login/sign-up page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    mode: AuthMode,
    pub identifier: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

impl Default for AuthForm {
    fn default() -> Self {
        Self {
            mode: AuthMode::Login,
            identifier: String::new(),
            email: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl AuthForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn visible_fields(&self) -> &'static [AuthField] {
        match self.mode {
            AuthMode::Login => &[AuthField::Identifier, AuthField::Password],
            AuthMode::SignUp => &[AuthField::Email, AuthField::Username, AuthField::Password],
        }
    }

    pub fn set(&mut self, field: AuthField, value: &str) {
        let slot = match field {
            AuthField::Identifier => &mut self.identifier,
            AuthField::Email => &mut self.email,
            AuthField::Username => &mut self.username,
            AuthField::Password => &mut self.password,
        };
        *slot = value.to_string();
    }

    pub fn get(&self, field: AuthField) -> &str {
        match field {
            AuthField::Identifier => &self.identifier,
            AuthField::Email => &self.email,
            AuthField::Username => &self.username,
            AuthField::Password => &self.password,
        }
    }

    /// Switches mode, carrying the typed login name over and dropping the
    /// password and any field the new mode does not show.
    pub fn toggle(&mut self) {
        self.password.clear();
        match self.mode {
            AuthMode::Login => {
                let carried = std::mem::take(&mut self.identifier);
                let carried = carried.trim();
                if carried.contains('@') {
                    self.email = carried.to_string();
                    self.username.clear();
                } else {
                    self.username = carried.to_string();
                    self.email.clear();
                }
                self.mode = AuthMode::SignUp;
            }
            AuthMode::SignUp => {
                let email = std::mem::take(&mut self.email);
                let username = std::mem::take(&mut self.username);
                self.identifier = if email.trim().is_empty() { username } else { email }
                    .trim()
                    .to_string();
                self.mode = AuthMode::Login;
            }
        }
    }

    pub fn validate(&self) -> Result<AuthRequest> {
        let required = |value: &str, label: &str| {
            if value.trim().is_empty() {
                Err(ChatError::InvalidInput(format!("{label} is required")))
            } else {
                Ok(value.trim().to_string())
            }
        };
        if self.password.is_empty() {
            return Err(ChatError::InvalidInput("Password is required".into()));
        }
        match self.mode {
            AuthMode::Login => Ok(AuthRequest::Login {
                identifier: required(&self.identifier, "Username or email")?,
                password: self.password.clone(),
            }),
            AuthMode::SignUp => {
                let email = required(&self.email, "Email")?;
                let username = required(&self.username, "Username")?;
                if username.contains('@') {
                    return Err(ChatError::InvalidInput(
                        "Username must not contain '@'".into(),
                    ));
                }
                Ok(AuthRequest::SignUp {
                    email,
                    username,
                    password: self.password.clone(),
                })
            }
        }
    }
}

/// Runs a validated request against the backend.
pub async fn submit(backend: &Backend, request: AuthRequest) -> Result<AuthUser> {
    match request {
        AuthRequest::Login {
            identifier,
            password,
        } => sign_in(backend, &identifier, &password).await,
        AuthRequest::SignUp {
            email,
            username,
            password,
        } => sign_up(backend, &email, &username, &password).await,
    }
}

/// Signs in with an email, or with a username resolved to its email first.
pub async fn sign_in(backend: &Backend, identifier: &str, password: &str) -> Result<AuthUser> {
    let identifier = identifier.trim();
    let email = if identifier.contains('@') {
        identifier.to_string()
    } else {
        resolve_username(backend, identifier).await?
    };
    backend.auth.sign_in(&email, password).await
}

async fn resolve_username(backend: &Backend, username: &str) -> Result<String> {
    let query = Query::collection(USERS)
        .where_eq(FIELD_USERNAME, username)
        .limit(1);
    let docs = backend.store.run_query(&query).await?;
    let doc = docs
        .first()
        .ok_or_else(|| ChatError::UserNotFound(username.to_string()))?;
    Ok(UserProfile::from_document(doc)?.email)
}

/// Creates the account, then its profile record.
pub async fn sign_up(
    backend: &Backend,
    email: &str,
    username: &str,
    password: &str,
) -> Result<AuthUser> {
    let user = backend.auth.sign_up(email.trim(), password).await?;
    let profile = UserProfile {
        id: user.uid.clone(),
        email: user.email.clone(),
        username: username.trim().to_string(),
    };
    backend
        .store
        .set(USERS, &profile.id, profile.to_fields())
        .await?;
    log::info!("registered {} as {}", profile.id, profile.username);
    Ok(user)
}

pub async fn sign_out(backend: &Backend) -> Result<()> {
    backend.auth.sign_out().await
}
