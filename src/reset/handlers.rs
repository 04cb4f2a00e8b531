use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{is_valid_email, password::MIN_PASSWORD_LEN},
    error::ApiError,
    state::AppState,
};

/// Same text whether or not the address belongs to an account.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If your email is registered, you will receive a password reset link";

pub fn reset_routes() -> Router<AppState> {
    Router::new()
        .route("/password/reset-request", post(request_reset))
        .route("/password/reset", post(reset_password))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Deserialize, Default)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetConfirmRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[instrument(skip(state, payload))]
pub async fn request_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    // The link is deliberately dropped here; it only travels by email.
    match state.resets.request_reset(&email).await {
        Ok(_) => Ok(Json(MessageResponse {
            message: RESET_REQUESTED_MESSAGE,
        })),
        Err(e) => {
            error!(error = %e, "password reset request failed");
            Err(e.into())
        }
    }
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = payload
        .token
        .or(query.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Reset token is required"))?;
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password too short"));
    }

    state
        .resets
        .reset_password(&token, &payload.new_password)
        .await
        .map_err(|e| {
            warn!(code = e.code(), "password reset rejected");
            ApiError::from(e)
        })?;

    info!("password reset via token");
    Ok(Json(MessageResponse {
        message: "Password has been reset successfully",
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    use super::*;

    fn app(state: AppState) -> Router {
        reset_routes().with_state(state)
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn request_response_is_identical_for_known_and_unknown_email() {
        let (state, store) = AppState::fake(100);
        store.add_user("known@example.com", "hash").await;

        let known = app(state.clone())
            .oneshot(post_json(
                "/password/reset-request",
                r#"{"email":"known@example.com"}"#.into(),
            ))
            .await
            .unwrap();
        let unknown = app(state)
            .oneshot(post_json(
                "/password/reset-request",
                r#"{"email":"ghost@example.com"}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(unknown.status(), StatusCode::OK);
        let known = json(known).await;
        let unknown = json(unknown).await;
        assert_eq!(known, unknown);
        assert!(known.get("reset_link").is_none());
    }

    #[tokio::test]
    async fn confirm_takes_token_from_query_and_reports_reuse() {
        let (state, store) = AppState::fake(100);
        store.add_user("alice@example.com", "hash").await;
        let link = state
            .resets
            .request_reset("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        let token = link.split("token=").nth(1).unwrap().to_owned();
        let uri = format!("/password/reset?token={token}");

        let first = app(state.clone())
            .oneshot(post_json(&uri, r#"{"new_password":"brand-new-pass"}"#.into()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app(state)
            .oneshot(post_json(&uri, r#"{"new_password":"other-new-pass"}"#.into()))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(second).await["code"], "token_already_used");
    }

    #[tokio::test]
    async fn confirm_rejects_unknown_token_and_short_password() {
        let (state, _) = AppState::fake(100);
        let res = app(state.clone())
            .oneshot(post_json(
                "/password/reset",
                r#"{"token":"nope","new_password":"long-enough-pass"}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res).await["code"], "token_not_found");

        let res = app(state)
            .oneshot(post_json(
                "/password/reset",
                r#"{"token":"nope","new_password":"short"}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res).await["code"], "bad_request");
    }
}
