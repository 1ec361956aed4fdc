use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use proximity_common::{Setting, ENCRYPTED_KEYS};

use crate::error::ApiError;
use crate::state::{parse_setting_category, AppState};

/// Settings in a category, keyed by name. Encrypted values are never
/// decrypted back out to the caller; the key is reported present but
/// masked.
pub async fn get_settings(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let category = parse_setting_category(&category).map_err(ApiError)?;
    let all = state.services.store.list_settings().await.map_err(ApiError)?;

    let map = all
        .into_iter()
        .filter(|s| s.category == category)
        .map(|s| {
            let value = if s.encrypted { "********".to_string() } else { s.value };
            (s.key, value)
        })
        .collect();

    Ok(Json(map))
}

pub async fn put_settings(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Json(values): Json<HashMap<String, String>>,
) -> Result<(), ApiError> {
    let category = parse_setting_category(&category).map_err(ApiError)?;

    for (key, value) in values {
        let encrypted = ENCRYPTED_KEYS.contains(&key.as_str());
        let stored_value = if encrypted {
            let ciphertext = state.master_key.encrypt_str(&value).map_err(ApiError)?;
            base64::engine::general_purpose::STANDARD.encode(ciphertext)
        } else {
            value
        };

        state
            .services
            .store
            .put_setting(&Setting {
                key,
                value: stored_value,
                category,
                encrypted,
            })
            .await
            .map_err(ApiError)?;
    }

    Ok(())
}
