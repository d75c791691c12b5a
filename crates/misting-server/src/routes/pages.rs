use axum::extract::State;
use axum::response::Html;

use crate::render;
use crate::state::AppState;

/// GET /: status page.
pub async fn index(State(app): State<AppState>) -> Html<String> {
    status(&app).await
}

pub(crate) async fn status(app: &AppState) -> Html<String> {
    let temperatures = app.controller.temperatures().await;
    let relays = app.controller.relays().await;
    Html(render::status_page(&temperatures, &relays))
}
