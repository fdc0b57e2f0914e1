use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use crate::{
    auth::{mint_session_token, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, *},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }

    let staff_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, role, is_active
        FROM staff_user
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !staff_user.is_active {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Account is disabled".into(),
        ));
    }

    if !verify_password(&req.password, &staff_user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let (access_token, token_hash) = mint_session_token();
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(staff_user.user_id)
    .bind(&token_hash)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(user_id = %staff_user.user_id, "staff login");

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            staff_user: UserProfile {
                user_id: staff_user.user_id,
                username: staff_user.username,
                display_name: staff_user.display_name,
                role: role_to_string(staff_user.role),
            },
        },
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    let staff_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, role, is_active
        FROM staff_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    if !staff_user.is_active {
        return Err(ApiError::session_expired());
    }

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(MeResponse {
        data: MeResponseData {
            staff_user: UserProfile {
                user_id: staff_user.user_id,
                username: staff_user.username,
                display_name: staff_user.display_name,
                role: role_to_string(staff_user.role),
            },
            session: SessionInfo {
                session_token_id: session.session_token_id,
                expires_at: session.expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
