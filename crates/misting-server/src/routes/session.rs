use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::{self, Sessions};
use crate::render;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

/// 302 to `location`, optionally setting a cookie.
fn found(location: &'static str, cookie: Option<String>) -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// GET /auth: login form.
pub async fn auth_page() -> Html<&'static str> {
    Html(render::LOGIN_PAGE)
}

/// POST /login: on success set the session cookie and go to `/`, otherwise
/// back to `/auth`.
pub async fn login(State(app): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let auth = &app.controller.config().auth;
    if auth::credentials_match(auth, &form.name, &form.password) {
        tracing::info!(user = %form.name, "login");
        return found("/", Some(app.sessions.set_cookie(&form.name, Utc::now())));
    }
    tracing::warn!(user = %form.name, "rejected login");
    found("/auth", None)
}

/// GET|POST /logout: clear the session and go to `/`.
pub async fn logout() -> Response {
    found("/", Some(Sessions::clear_cookie()))
}
