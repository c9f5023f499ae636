use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use tandem_sync::{SyncError, Tree, classify, route};
use tandem_types::api::{
    LoginRequest, LoginResponse, PasswordStrength, RegisterRequest, RegisterResponse, RouteQuery,
    RouteResponse,
};
use tandem_types::models::{ConversationId, Sender};

use crate::error::ApiError;
use crate::middleware::{Claims, claims_from_headers};

/// Shortest password the sign-up form accepts.
const MIN_PASSWORD_LEN: usize = 6;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub tree: Tree,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(ApiError::MalformedPayload("email address required".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::MalformedPayload(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user = state.tree.create_user(req.name.trim(), email, &password_hash).await?;

    let role = state.tree.role_of(&user.email);
    let token = create_token(&state.jwt_secret, user.uid, &user.email, &user.name)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.uid,
            token,
            role,
            screen: route(role, None),
            password_strength: password_strength(&req.password),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, hash) = state
        .tree
        .credentials(req.email.trim())
        .await?
        .ok_or(SyncError::Authentication)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&hash).map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed login for {}", user.email);
            SyncError::Authentication
        })?;

    state.tree.set_online(user.uid).await?;
    info!("{} ({}) logged in", user.email, user.uid);

    let role = state.tree.role_of(&user.email);
    let token = create_token(&state.jwt_secret, user.uid, &user.email, &user.name)?;

    Ok(Json(LoginResponse {
        user_id: user.uid,
        name: user.name,
        token,
        role,
        screen: route(role, None),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.tree.set_offline(claims.sub).await?;
    info!("{} ({}) logged out", claims.email, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// Where the caller lands for a requested screen. Works with or without a token.
pub async fn resolve_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RouteQuery>,
) -> Json<RouteResponse> {
    let claims = claims_from_headers(&headers, &state.jwt_secret);
    let role = classify(claims.as_ref().map(|c| c.email.as_str()), state.tree.admin_email());
    Json(RouteResponse {
        role,
        screen: route(role, query.screen),
    })
}

/// The conversation named by `user_id` and the side the caller writes as.
/// Users may only reach their own conversation; the admin may reach any.
pub async fn conversation_access(
    state: &AppStateInner,
    claims: &Claims,
    user_id: Uuid,
) -> Result<(ConversationId, Sender), ApiError> {
    Ok(state
        .tree
        .conversation_access(claims.sub, &claims.email, user_id)
        .await?)
}

/// Rough strength rating shown after sign-up.
pub fn password_strength(password: &str) -> PasswordStrength {
    if password.chars().count() < MIN_PASSWORD_LEN {
        PasswordStrength::Weak
    } else if password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
    {
        PasswordStrength::Strong
    } else {
        PasswordStrength::Medium
    }
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn strength_ratings() {
        assert_eq!(password_strength("abc"), PasswordStrength::Weak);
        assert_eq!(password_strength("abcdefg"), PasswordStrength::Medium);
        assert_eq!(password_strength("Abcdef1"), PasswordStrength::Strong);
    }

    #[test]
    fn token_round_trips_through_middleware_decoder() {
        let uid = Uuid::new_v4();
        let token = create_token("secret", uid, "ada@example.com", "Ada").unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, uid);
        assert_eq!(claims.email, "ada@example.com");
        assert!(decode_token(&token, "other").is_none());
    }
}
