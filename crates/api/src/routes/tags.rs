//! Tag routes: listing, subscribe/unsubscribe, and sync triggering.
//!
//! `POST /tags` is form-encoded with a `type` discriminator. Every tag token
//! in the request is validated up front: one malformed token rejects the
//! whole request before any registry or store mutation.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;

use relay_common::error::AppError;
use relay_common::types::Tag;
use relay_dispatch::pipeline::SyncOutcome;
use relay_dispatch::registry::RegisterOutcome;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags))
        .route("/tags", post(mutate_tags))
}

#[derive(Debug, Deserialize)]
struct TagsForm {
    /// Operation discriminator: `subscribe`, `unsubscribe`, or `sync`.
    #[serde(rename = "type")]
    action: String,
    /// Device identifier; required for subscribe/unsubscribe.
    id: Option<String>,
    /// Comma-separated raw tag names.
    tags: Option<String>,
}

/// GET /tags — every tag currently registered, sorted.
async fn list_tags(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "tags": state.registry.all() }))
}

/// POST /tags — subscribe, unsubscribe, or trigger a sync.
async fn mutate_tags(
    State(state): State<AppState>,
    Form(form): Form<TagsForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tags = parse_tags(form.tags.as_deref().unwrap_or(""))?;
    if tags.is_empty() {
        return Err(AppError::Validation(
            "at least one tag is required".to_string(),
        ));
    }

    match form.action.as_str() {
        "subscribe" => {
            let device_id = require_id(&form)?;
            register_tags(&state, &tags).await?;
            let changed = state.store.add_subscriptions(device_id, &tags).await?;
            tracing::info!(device_id, tags = tags.len(), changed, "Subscribe request handled");
            Ok(Json(json!({ "subscribed": changed, "tags": tags })))
        }
        "unsubscribe" => {
            let device_id = require_id(&form)?;
            let changed = state.store.remove_subscriptions(device_id, &tags).await?;
            tracing::info!(device_id, tags = tags.len(), changed, "Unsubscribe request handled");
            Ok(Json(json!({ "unsubscribed": changed, "tags": tags })))
        }
        "sync" => {
            register_tags(&state, &tags).await?;

            let mut queued = Vec::new();
            let mut already_queued = Vec::new();
            for tag in tags {
                let outcome = state
                    .dispatcher
                    .request_sync(tag.clone())
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                match outcome {
                    SyncOutcome::Enqueued => queued.push(tag),
                    SyncOutcome::AlreadyQueued => already_queued.push(tag),
                }
            }
            Ok(Json(json!({ "queued": queued, "already_queued": already_queued })))
        }
        other => Err(AppError::Validation(format!(
            "unknown type '{other}': expected subscribe, unsubscribe, or sync"
        ))),
    }
}

/// Split a comma-separated tag list and normalize every token. Any invalid
/// token fails the whole batch.
fn parse_tags(raw: &str) -> Result<Vec<Tag>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Tag::normalize(s).map_err(AppError::from))
        .collect()
}

fn require_id(form: &TagsForm) -> Result<&str, AppError> {
    match form.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::Validation(format!(
            "'id' is required for type '{}'",
            form.action
        ))),
    }
}

/// Register any tags not yet known, in the registry and the store.
async fn register_tags(state: &AppState, tags: &[Tag]) -> Result<(), AppError> {
    for tag in tags {
        if state.registry.register(tag.clone()) == RegisterOutcome::Added {
            state.store.add_tag(tag).await?;
            tracing::info!(tag = %tag, "New tag registered via API");
        }
    }
    Ok(())
}
