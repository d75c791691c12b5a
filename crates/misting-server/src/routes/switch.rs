use axum::extract::State;
use axum::response::Html;
use axum::Form;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::pages;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SwitchParams {
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub state: String,
}

/// GET|POST /switch: switch a relay, then render the status page.
///
/// GET reads `pin` and `state` from the query string, POST from a
/// form-encoded body.
pub async fn switch_relay(
    State(app): State<AppState>,
    Form(params): Form<SwitchParams>,
) -> Result<Html<String>, AppError> {
    let outcome = app
        .controller
        .switch()
        .switch_params(&params.pin, &params.state)
        .await?;
    tracing::debug!(pin = outcome.relay.pin, state = %outcome.requested, "switch request queued");
    Ok(pages::status(&app).await)
}
