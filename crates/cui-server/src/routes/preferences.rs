use axum::extract::State;
use axum::Json;

use cui_core::preferences::Preferences;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/preferences
pub async fn get(State(app): State<AppState>) -> Json<Preferences> {
    Json(app.preferences.get())
}

/// PUT /api/preferences — whole-document replace.
pub async fn put(
    State(app): State<AppState>,
    Json(prefs): Json<Preferences>,
) -> Result<Json<Preferences>, AppError> {
    Ok(Json(app.preferences.put(prefs)?))
}
