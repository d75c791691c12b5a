use axum::extract::State;
use axum::Json;
use misting_core::relay::Relay;
use misting_core::sensors::Sensor;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TempResponse {
    #[serde(rename = "Temperature")]
    pub temperature: Vec<Sensor>,
    #[serde(rename = "Relays")]
    pub relays: Vec<Relay>,
}

/// GET /temp: latest sensor readings and relay snapshot.
pub async fn get_temp(State(app): State<AppState>) -> Json<TempResponse> {
    Json(TempResponse {
        temperature: app.controller.temperatures().await,
        relays: app.controller.relays().await,
    })
}
