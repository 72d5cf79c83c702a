//! Application state: the progress store, the generation client, and the
//! active session map.
//!
//! This module owns:
//!   - the JSON-file progress store (created on first run with the admin)
//!   - the optional generation client (OpenAI, if an API key is present)
//!   - the token -> session map for logged-in users
//!
//! One session per user: logging in again replaces any previous session for
//! that username.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{hash_password, normalize_username, validate_registration, verify_password};
use crate::config::{load_trainer_config_from_env, TrainerConfig};
use crate::domain::{Role, UserRecord, DEFAULT_LEVEL};
use crate::error::AuthError;
use crate::generation::GenerationClient;
use crate::openai::OpenAI;
use crate::round::Session;
use crate::store::{JsonFileStore, ProgressStore};

/// What a session token maps to. Admins never carry a round.
///
/// Student sessions are shared handles: callers clone the `Arc` out of the
/// map and release the map lock before awaiting anything on the session, so
/// one student's in-flight generation never blocks the rest of the service.
pub enum ActiveSession {
    Admin { username: String },
    Student { username: String, session: Arc<Mutex<Session>> },
}

impl ActiveSession {
    pub fn username(&self) -> &str {
        match self {
            ActiveSession::Admin { username } => username,
            ActiveSession::Student { username, .. } => username,
        }
    }
}

/// Successful login result handed back to the HTTP layer.
pub struct LoginOk {
    pub token: String,
    pub is_admin: bool,
    pub level: Option<u8>,
}

pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
    pub generator: Option<GenerationClient<OpenAI>>,
    pub sessions: RwLock<HashMap<String, ActiveSession>>,
    pub config: TrainerConfig,
}

impl AppState {
    /// Build state from env: load config, open (or bootstrap) the store,
    /// init the generation client.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_trainer_config_from_env().unwrap_or_default();

        let store_path =
            std::env::var("STORE_PATH").unwrap_or_else(|_| "user_data.json".into());
        let admin_user = normalize_username(
            &std::env::var("ADMIN_USER").unwrap_or_else(|_| "admin@localhost.local".into()),
        );
        // Only pay for the hash when the store file needs bootstrapping.
        let admin_hash = if std::path::Path::new(&store_path).exists() {
            String::new()
        } else {
            let admin_pass =
                std::env::var("ADMIN_PASS").unwrap_or_else(|_| "cambiame".into());
            if std::env::var("ADMIN_PASS").is_err() {
                warn!(target: "lectura_backend", %admin_user,
                      "ADMIN_PASS not set; bootstrapping admin with the default password");
            }
            hash_password(&admin_pass)?
        };
        let store = JsonFileStore::open(&store_path, &admin_user, &admin_hash)?;

        let generator = OpenAI::from_env().map(|oa| {
            info!(target: "lectura_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
            GenerationClient::new(oa, config.prompts.clone(), config.generation.clone())
        });
        if generator.is_none() {
            warn!(target: "lectura_backend",
                  "OpenAI disabled (no OPENAI_API_KEY). Rounds cannot be generated.");
        }

        Ok(Self {
            store: Arc::new(store),
            generator,
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Register a new student account at the default level.
    #[instrument(level = "info", skip(self, password, confirm))]
    pub fn register(
        &self,
        username: &str,
        password: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        let username = normalize_username(username);
        validate_registration(&username, password, confirm)?;
        let password_hash =
            hash_password(password).map_err(|e| AuthError::Hash(e.to_string()))?;
        let record = UserRecord {
            username: username.clone(),
            password_hash,
            role: Role::Student { current_level: DEFAULT_LEVEL, history: vec![] },
        };
        if !self.store.add_user(record)? {
            return Err(AuthError::DuplicateUser);
        }
        info!(target: "lectura_backend", %username, level = DEFAULT_LEVEL, "Student registered");
        Ok(())
    }

    /// Verify credentials and open a fresh session. Any previous session for
    /// the same username is dropped, so practice state always starts clean.
    #[instrument(level = "info", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOk, AuthError> {
        let username = normalize_username(username);
        let record = self
            .store
            .get_user(&username)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &record.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let level = record.current_level();
        let active = match level {
            None => ActiveSession::Admin { username: username.clone() },
            Some(level) => ActiveSession::Student {
                username: username.clone(),
                session: Arc::new(Mutex::new(Session::new(username.clone(), level))),
            },
        };

        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.username() != username);
        sessions.insert(token.clone(), active);
        info!(target: "lectura_backend", %username, is_admin = level.is_none(), "Login ok");

        Ok(LoginOk { token, is_admin: level.is_none(), level })
    }

    /// Drop a session, persisting the student's level when it diverges from
    /// storage. Returns false for unknown tokens.
    #[instrument(level = "info", skip(self, token))]
    pub async fn logout(&self, token: &str) -> bool {
        let removed = self.sessions.write().await.remove(token);
        let Some(active) = removed else { return false };

        if let ActiveSession::Student { username, session } = &active {
            let current_level = session.lock().await.current_level;
            let stored = self
                .store
                .get_user(username)
                .ok()
                .flatten()
                .and_then(|r| r.current_level());
            if stored != Some(current_level) {
                if let Err(e) = self.store.update_level(username, current_level) {
                    warn!(target: "lectura_backend", %username, error = %e,
                          "Could not persist level at logout");
                }
            }
        }
        info!(target: "lectura_backend", username = %active.username(), "Logout");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(MemoryStore::default()),
            generator: None,
            sessions: RwLock::new(HashMap::new()),
            config: TrainerConfig::default(),
        }
    }

    async fn login_student(state: &AppState, username: &str) -> String {
        state.register(username, "secreto", "secreto").unwrap();
        state.login(username, "secreto").await.unwrap().token
    }

    async fn session_handle(state: &AppState, token: &str) -> Arc<Mutex<Session>> {
        match state.sessions.read().await.get(token) {
            Some(ActiveSession::Student { session, .. }) => session.clone(),
            _ => panic!("expected a student session for this token"),
        }
    }

    #[tokio::test]
    async fn logout_persists_a_diverged_level() {
        let state = test_state();
        let token = login_student(&state, "ana@escuela.edu").await;

        session_handle(&state, &token).await.lock().await.current_level = 7;
        assert!(state.logout(&token).await);

        let record = state.store.get_user("ana@escuela.edu").unwrap().unwrap();
        assert_eq!(record.current_level(), Some(7));
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn logout_with_unknown_token_is_refused() {
        let state = test_state();
        assert!(!state.logout("no-such-token").await);
    }

    #[tokio::test]
    async fn relogin_replaces_the_previous_session() {
        let state = test_state();
        let first = login_student(&state, "ana@escuela.edu").await;
        let second = state.login("ana@escuela.edu", "secreto").await.unwrap().token;

        let sessions = state.sessions.read().await;
        assert!(sessions.get(&first).is_none());
        assert!(sessions.get(&second).is_some());
    }

    #[tokio::test]
    async fn busy_session_does_not_block_other_sessions() {
        let state = test_state();
        let token_a = login_student(&state, "ana@escuela.edu").await;
        let token_b = login_student(&state, "beto@escuela.edu").await;

        // Hold A's session lock the way a long in-flight generation would.
        let busy = session_handle(&state, &token_a).await;
        let _busy = busy.lock().await;

        // B's session must stay reachable and lockable meanwhile.
        let level = tokio::time::timeout(Duration::from_millis(200), async {
            let handle = session_handle(&state, &token_b).await;
            let session = handle.lock().await;
            session.current_level
        })
        .await
        .expect("another student's session was blocked");
        assert_eq!(level, DEFAULT_LEVEL);
    }
}
