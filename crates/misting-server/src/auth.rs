use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use misting_core::config::AuthConfig;
use sha2::Sha256;

use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session";

type HmacSha256 = Hmac<Sha256>;

/// Signs and checks `session` cookies.
///
/// Cookie value: `b64(name) "." b64(expiry unix seconds) "." b64(hmac)`, where
/// the HMAC covers the first two segments joined by the dot.
pub struct Sessions {
    key: Vec<u8>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }

    /// Keys from `auth.session_secret`, or a random per-process key.
    pub fn from_config(config: &AuthConfig) -> Self {
        let ttl = Duration::hours(config.session_hours.max(1) as i64);
        match &config.session_secret {
            Some(secret) if !secret.is_empty() => Self::new(secret.as_bytes(), ttl),
            _ => Self::new(rand::random::<[u8; 32]>().to_vec(), ttl),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("infallible: hmac takes keys of any length")
    }

    pub fn issue(&self, name: &str, now: DateTime<Utc>) -> String {
        let payload = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(name),
            URL_SAFE_NO_PAD.encode((now + self.ttl).timestamp().to_string())
        );
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{payload}.{sig}")
    }

    /// The user name in a valid, unexpired cookie value.
    pub fn verify(&self, value: &str, now: DateTime<Utc>) -> Option<String> {
        let (payload, sig) = value.rsplit_once('.')?;
        let sig = URL_SAFE_NO_PAD.decode(sig).ok()?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).ok()?;

        let (name, expiry) = payload.split_once('.')?;
        let expiry = URL_SAFE_NO_PAD.decode(expiry).ok()?;
        let expiry: i64 = std::str::from_utf8(&expiry).ok()?.parse().ok()?;
        if expiry <= now.timestamp() {
            return None;
        }
        let name = String::from_utf8(URL_SAFE_NO_PAD.decode(name).ok()?).ok()?;
        (!name.is_empty()).then_some(name)
    }

    pub fn set_cookie(&self, name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{SESSION_COOKIE}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            self.issue(name, now),
            self.ttl.num_seconds()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
    }
}

/// Both fields must be non-empty and match the configured account.
pub fn credentials_match(config: &AuthConfig, name: &str, password: &str) -> bool {
    !name.is_empty()
        && !password.is_empty()
        && name == config.username
        && password == config.password
}

fn session_cookie(req: &Request) -> Option<&str> {
    let cookies = req.headers().get("cookie")?.to_str().ok()?;
    cookies
        .split(';')
        .find_map(|part| part.trim().strip_prefix("session="))
}

/// Gate for the operator pages.
///
/// A valid session passes through. Otherwise `/api/*` gets a 401 JSON body
/// and everything else a 302 to `/auth`.
pub async fn require_session(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let user = session_cookie(&req).and_then(|v| app.sessions.verify(v, Utc::now()));
    if let Some(user) = user {
        tracing::debug!(%user, path = req.uri().path(), "session accepted");
        return next.run(req).await;
    }

    if req.uri().path().starts_with("/api/") {
        Response::builder()
            .status(401)
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"error":"unauthorized"}"#))
            .expect("infallible: all header values are valid ASCII")
    } else {
        Response::builder()
            .status(302)
            .header("Location", "/auth")
            .body(Body::empty())
            .expect("infallible: all header values are valid ASCII")
    }
}
