//! Cookie-backed server-side sessions for frontend applications.
//!
//! The session identifier travels in a private (encrypted) cookie whose name
//! carries a per-process random suffix; session data lives in an in-process
//! store that idles entries out after the configured timeout. Idle expiry is
//! the store's concern, not a pipeline timeout. The jar key is derived from
//! the configured cookie secret; without one, a random per-process secret is
//! used and sessions do not survive restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use hkdf::Hkdf;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{ServerConfig, MAX_SESSIONS};
use crate::pipeline::PipelineState;

type SessionData = Arc<RwLock<HashMap<String, serde_json::Value>>>;

/// In-process session store shared by all request tasks.
pub(crate) struct SessionStore {
    cache: Cache<Uuid, SessionData>,
    pub(crate) cookie_name: String,
    secure_cookies: bool,
}

impl SessionStore {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        let idle = Duration::from_secs(
            u64::from(config.controller.session_idle_timeout_minutes) * 60,
        );
        let scope = if config.http.main_domain.is_empty() {
            env!("CARGO_PKG_NAME")
        } else {
            &config.http.main_domain
        };
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_SESSIONS)
                .time_to_idle(idle)
                .build(),
            cookie_name: format!(".{scope}.{suffix}.session"),
            secure_cookies: config.http.https_enabled,
        }
    }
}

/// Request-scoped handle onto the session, available from the extensions.
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    data: SessionData,
    dirty: Arc<AtomicBool>,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            data: Arc::new(RwLock::new(HashMap::new())),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    fn existing(id: Uuid, data: SessionData) -> Self {
        Self {
            id,
            data,
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.data.read().await;
        data.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub async fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.data.write().await.insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn remove(&self, key: &str) {
        if self.data.write().await.remove(key).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub async fn clear(&self) {
        self.data.write().await.clear();
        self.dirty.store(true, Ordering::Release);
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

/// Session stage: attach a session handle and persist it after the request.
///
/// A cookie is only issued once a new session has actually been written to,
/// so anonymous traffic does not accumulate store entries.
pub(crate) async fn session_layer(
    State(state): State<PipelineState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(store) = state.sessions.clone() else {
        return next.run(request).await;
    };

    let known_id = jar
        .get(&store.cookie_name)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());
    let (session, is_new) = match known_id {
        Some(id) => match store.cache.get(&id).await {
            Some(data) => (Session::existing(id, data), false),
            None => (Session::fresh(), true),
        },
        None => (Session::fresh(), true),
    };
    request.extensions_mut().insert(session.clone());

    let response = next.run(request).await;

    if session.is_dirty() {
        store
            .cache
            .insert(session.id, session.data.clone())
            .await;
    }
    if is_new && session.is_dirty() {
        let cookie = Cookie::build((store.cookie_name.clone(), session.id.to_string()))
            .path("/")
            .http_only(true)
            .secure(store.secure_cookies)
            .same_site(SameSite::Strict);
        return (jar.add(cookie), response).into_response();
    }
    response
}

/// Derive the 64-byte private cookie jar key from the configured secret.
pub(crate) fn derive_cookie_key(secret: &str) -> Key {
    let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut key_bytes = [0u8; 64];
    hkdf.expand(b"groundwork-session-cookie", &mut key_bytes)
        .expect("64 bytes is a valid length for HKDF-SHA256");
    Key::from(&key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_config(minutes: u32) -> ServerConfig {
        let mut config: ServerConfig = toml::from_str("[http]\n").expect("config should parse");
        config.controller.session_idle_timeout_minutes = minutes;
        config.http.main_domain = "example.com".to_string();
        config
    }

    #[test]
    fn cookie_name_is_scoped_and_randomized() {
        let a = SessionStore::new(&store_config(20));
        let b = SessionStore::new(&store_config(20));
        assert!(a.cookie_name.starts_with(".example.com."));
        assert!(a.cookie_name.ends_with(".session"));
        assert_ne!(a.cookie_name, b.cookie_name);
    }

    #[tokio::test]
    async fn session_round_trips_values_and_tracks_dirtiness() {
        let session = Session::fresh();
        assert!(!session.is_dirty());
        session
            .insert("user", "amalie")
            .await
            .expect("string should serialize");
        assert!(session.is_dirty());
        assert_eq!(session.get::<String>("user").await.as_deref(), Some("amalie"));
        session.remove("user").await;
        assert_eq!(session.get::<String>("user").await, None);
    }

    #[test]
    fn derived_keys_are_deterministic_per_secret() {
        assert_eq!(
            derive_cookie_key("secret-a").master(),
            derive_cookie_key("secret-a").master()
        );
        assert_ne!(
            derive_cookie_key("secret-a").master(),
            derive_cookie_key("secret-b").master()
        );
    }
}
