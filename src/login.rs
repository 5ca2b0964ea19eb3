//! User accounts, sessions and the OTP-based registration/recovery flows.
//!
//! Accounts live on the `User` tab of the workbook; this module keeps the
//! transient state (sessions, pending registrations, reset tokens) in-process
//! and exposes the REST handlers for the whole account lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::sheets::{SheetsError, UserRecord};

/// Authenticated user as echoed back to the portal. The password hash never
/// leaves the server.
#[derive(Debug, Serialize, Clone)]
pub struct SessionUser {
    pub id: u32,
    pub username: String,
    pub email: String,
}

impl From<&UserRecord> for SessionUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// An authenticated session, keyed by its cookie value.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: SessionUser,
    pub expires_at: SystemTime,
}

/// A registration parked while its email OTP is outstanding.
#[derive(Debug, Clone)]
struct PendingRegistration {
    username: String,
    email: String,
    password_hash: String,
    otp: String,
    expires_at: SystemTime,
}

/// A password reset parked while its email OTP is outstanding.
#[derive(Debug, Clone)]
struct ResetRequest {
    user_id: u32,
    otp: String,
    expires_at: SystemTime,
}

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
    static ref PENDING_REGISTRATIONS: RwLock<HashMap<String, PendingRegistration>> =
        RwLock::new(HashMap::new());
    static ref RESET_TOKENS: RwLock<HashMap<String, ResetRequest>> = RwLock::new(HashMap::new());
}

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
const RESET_TOKEN_DURATION: u64 = 60 * 60; // 1 hour in seconds
const PENDING_DURATION: u64 = 60 * 60; // 1 hour in seconds
const SESSION_COOKIE: &str = "session";

/// Drop entries whose expiry has passed. Each map purges on insert (and
/// sessions additionally on a failed validation) so the in-process state
/// cannot grow without bound over a long-running server.
fn purge_expired<T>(map: &mut HashMap<String, T>, expires_at: impl Fn(&T) -> SystemTime) {
    let now = SystemTime::now();
    map.retain(|_, entry| expires_at(entry) > now);
}

/// Hash a password using Argon2id.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, String>` - The password hash or an error
fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

/// Verify a password against a stored Argon2 hash.
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored password hash to check against
///
/// # Returns
/// * `Result<bool, String>` - True if the password matches, false if not, or an error
fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err("Invalid password hash format".to_string()),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

/// Create a new session for an authenticated user.
///
/// # Arguments
/// * `user` - The user to create a session for
///
/// # Returns
/// * `String` - A unique session ID
pub fn create_session(user: SessionUser) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let mut sessions = SESSIONS.write().unwrap();
    purge_expired(&mut sessions, |s| s.expires_at);
    sessions.insert(session_id.clone(), Session { user, expires_at });

    session_id
}

/// Validate a session cookie value.
///
/// # Arguments
/// * `session_id` - The session ID to validate
///
/// # Returns
/// * `Option<SessionUser>` - The user for the session if valid and unexpired
pub fn validate_session(session_id: &str) -> Option<SessionUser> {
    let mut sessions = SESSIONS.write().unwrap();

    match sessions.get(session_id) {
        Some(session) if session.expires_at > SystemTime::now() => Some(session.user.clone()),
        Some(_) => {
            sessions.remove(session_id);
            None
        }
        None => None,
    }
}

/// Drop a session, if it exists.
pub fn destroy_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap();
    sessions.remove(session_id);
}

/// Generate a 6-digit OTP for email verification.
fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Generate an opaque hex token for pending registrations and resets.
fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .build()
}

/// Authentication middleware for the data endpoints.
///
/// A request with a valid, unexpired session cookie passes through with the
/// user attached as an extension; anything else is answered with a bare 401.
pub async fn require_auth(jar: CookieJar, mut request: Request, next: Next) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(user) = validate_session(cookie.value()) {
            request.extensions_mut().insert(user);
            return next.run(request).await;
        }
    }

    StatusCode::UNAUTHORIZED.into_response()
}

// Request payloads for the account endpoints.

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(rename = "tempUserId")]
    pub temp_user_id: String,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetTokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub otp: String,
    pub password: String,
}

/// Handle registration requests.
///
/// Parks the would-be account under a temp id, emails a 6-digit OTP to the
/// given address and hands the temp id back for the verification step.
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Username, email and password are required" })),
        )
            .into_response();
    }

    match state.sheets.user_by_username(&req.username).await {
        Ok(Some(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Username already exists" })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "User lookup failed during registration");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Registration failed" })),
            )
                .into_response();
        }
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Registration failed" })),
            )
                .into_response();
        }
    };

    let otp = generate_otp();
    let temp_user_id = generate_token();

    {
        let mut pending = PENDING_REGISTRATIONS.write().unwrap();
        purge_expired(&mut pending, |p| p.expires_at);
        pending.insert(
            temp_user_id.clone(),
            PendingRegistration {
                username: req.username.clone(),
                email: req.email.clone(),
                password_hash,
                otp: otp.clone(),
                expires_at: SystemTime::now() + Duration::from_secs(PENDING_DURATION),
            },
        );
    }

    if let Err(e) = state.mailer.send_verification_otp(&req.email, &otp) {
        error!(error = %e, "Failed to send verification email");
        PENDING_REGISTRATIONS.write().unwrap().remove(&temp_user_id);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to send verification email" })),
        )
            .into_response();
    }

    info!(username = %req.username, "Registration pending OTP verification");
    (StatusCode::OK, Json(json!({ "tempUserId": temp_user_id }))).into_response()
}

/// Handle the OTP verification step of registration.
///
/// On a matching OTP the parked account is written to the workbook, a session
/// is opened and the new user is returned with status 201.
pub async fn handle_verify_otp(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<VerifyOtpRequest>,
) -> Response {
    let pending = {
        let registrations = PENDING_REGISTRATIONS.read().unwrap();
        registrations.get(&req.temp_user_id).cloned()
    };

    let pending = match pending {
        Some(p) if p.expires_at > SystemTime::now() => p,
        Some(_) => {
            PENDING_REGISTRATIONS.write().unwrap().remove(&req.temp_user_id);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid or expired verification session" })),
            )
                .into_response();
        }
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid or expired verification session" })),
            )
                .into_response();
        }
    };

    if pending.otp != req.otp {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid OTP" })),
        )
            .into_response();
    }

    let user = match state
        .sheets
        .create_user(&pending.username, &pending.password_hash, &pending.email)
        .await
    {
        Ok(user) => user,
        Err(SheetsError::UsernameTaken) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Username already exists" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to create user");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to create user" })),
            )
                .into_response();
        }
    };

    PENDING_REGISTRATIONS.write().unwrap().remove(&req.temp_user_id);

    let session_user = SessionUser::from(&user);
    let session_id = create_session(session_user.clone());
    info!(username = %session_user.username, "User registered");

    (
        StatusCode::CREATED,
        jar.add(session_cookie(session_id)),
        Json(session_user),
    )
        .into_response()
}

/// Handle login requests.
///
/// # Arguments
/// * `state` - Shared application state for the user lookup
/// * `jar` - Cookie jar for storing the session cookie
/// * `req` - JSON body containing the username and password
///
/// # Returns
/// * `Response` - The user and a session cookie if valid, 401 otherwise
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Response {
    let user = match state.sheets.user_by_username(&req.username).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!(error = %e, "User lookup failed during login");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response();
        }
    };

    match verify_password(&req.password, &user.password_hash) {
        Ok(true) => {
            let session_user = SessionUser::from(&user);
            let session_id = create_session(session_user.clone());
            info!(username = %session_user.username, "User logged in");
            (jar.add(session_cookie(session_id)), Json(session_user)).into_response()
        }
        Ok(false) => StatusCode::UNAUTHORIZED.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response(),
    }
}

/// Handle logout: drop the session and clear the cookie.
pub async fn handle_logout(jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        destroy_session(cookie.value());
    }

    (
        jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/")),
        Json(json!({ "message": "Logged out" })),
    )
        .into_response()
}

/// Return the currently authenticated user, or 401.
pub async fn current_user(jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(user) = validate_session(cookie.value()) {
            return Json(user).into_response();
        }
    }

    StatusCode::UNAUTHORIZED.into_response()
}

/// Handle forgot-password requests.
///
/// Looks the account up by email, parks a reset OTP under an opaque token
/// with a one hour expiry and emails the OTP.
pub async fn handle_forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Response {
    let user = match state.sheets.user_by_email(&req.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "No account found with this email address" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "User lookup failed during password reset");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to generate reset code" })),
            )
                .into_response();
        }
    };

    let otp = generate_otp();
    let token = generate_token();

    {
        let mut tokens = RESET_TOKENS.write().unwrap();
        purge_expired(&mut tokens, |r| r.expires_at);
        tokens.insert(
            token.clone(),
            ResetRequest {
                user_id: user.id,
                otp: otp.clone(),
                expires_at: SystemTime::now() + Duration::from_secs(RESET_TOKEN_DURATION),
            },
        );
    }

    if let Err(e) = state.mailer.send_password_reset_otp(&user.email, &otp) {
        error!(error = %e, "Failed to send password reset email");
        RESET_TOKENS.write().unwrap().remove(&token);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to send password reset email" })),
        )
            .into_response();
    }

    (StatusCode::OK, Json(json!({ "token": token }))).into_response()
}

/// Handle forgot-username requests: email the username for a known address.
pub async fn handle_forgot_username(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Response {
    let user = match state.sheets.user_by_email(&req.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "No account found with this email address" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "User lookup failed during username recovery");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to send username recovery email" })),
            )
                .into_response();
        }
    };

    if let Err(e) = state.mailer.send_username_recovery(&user.email, &user.username) {
        error!(error = %e, "Failed to send username recovery email");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to send username recovery email" })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "Username sent successfully" })),
    )
        .into_response()
}

/// Handle the reset-password confirmation.
///
/// Validates the reset token from the query string and the OTP from the body,
/// then writes the new password hash back to the workbook.
pub async fn handle_reset_password(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResetTokenQuery>,
    Json(req): Json<ResetPasswordRequest>,
) -> Response {
    let reset = {
        let tokens = RESET_TOKENS.read().unwrap();
        tokens.get(&query.token).cloned()
    };

    let reset = match reset {
        Some(reset) => reset,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid or expired reset token" })),
            )
                .into_response();
        }
    };

    if SystemTime::now() > reset.expires_at {
        RESET_TOKENS.write().unwrap().remove(&query.token);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Reset token has expired" })),
        )
            .into_response();
    }

    if reset.otp != req.otp {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid OTP" })),
        )
            .into_response();
    }

    // The account may have disappeared from the workbook since the token
    // was issued; re-verify it before writing anything back.
    match state.sheets.user_by_id(reset.user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "User not found" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "User lookup failed during password reset");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to reset password" })),
            )
                .into_response();
        }
    }

    let new_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to reset password" })),
            )
                .into_response();
        }
    };

    match state.sheets.update_user_password(reset.user_id, &new_hash).await {
        Ok(()) => {
            RESET_TOKENS.write().unwrap().remove(&query.token);
            (
                StatusCode::OK,
                Json(json!({ "message": "Password successfully reset" })),
            )
                .into_response()
        }
        Err(SheetsError::UserNotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "User not found" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to update password");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to reset password" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(name: &str) -> SessionUser {
        SessionUser {
            id: 1,
            username: name.to_string(),
            email: format!("{name}@example.com"),
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn hashing_salts_are_unique() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_error_not_a_match() {
        assert!(verify_password("anything", "not-a-hash").is_err());
    }

    #[test]
    fn sessions_validate_until_destroyed() {
        let session_id = create_session(test_user("alice"));
        let user = validate_session(&session_id).unwrap();
        assert_eq!(user.username, "alice");

        destroy_session(&session_id);
        assert!(validate_session(&session_id).is_none());
    }

    #[test]
    fn expired_sessions_do_not_validate() {
        let session_id = Uuid::new_v4().to_string();
        SESSIONS.write().unwrap().insert(
            session_id.clone(),
            Session {
                user: test_user("bob"),
                expires_at: SystemTime::now() - Duration::from_secs(1),
            },
        );
        assert!(validate_session(&session_id).is_none());
    }

    #[test]
    fn unknown_session_does_not_validate() {
        assert!(validate_session("no-such-session").is_none());
    }

    #[test]
    fn failed_validation_drops_the_expired_entry() {
        let session_id = Uuid::new_v4().to_string();
        SESSIONS.write().unwrap().insert(
            session_id.clone(),
            Session {
                user: test_user("carol"),
                expires_at: SystemTime::now() - Duration::from_secs(1),
            },
        );
        assert!(validate_session(&session_id).is_none());
        assert!(!SESSIONS.read().unwrap().contains_key(&session_id));
    }

    #[test]
    fn creating_a_session_purges_expired_ones() {
        let stale_id = Uuid::new_v4().to_string();
        SESSIONS.write().unwrap().insert(
            stale_id.clone(),
            Session {
                user: test_user("dave"),
                expires_at: SystemTime::now() - Duration::from_secs(1),
            },
        );
        let fresh_id = create_session(test_user("erin"));
        let sessions = SESSIONS.read().unwrap();
        assert!(!sessions.contains_key(&stale_id));
        assert!(sessions.contains_key(&fresh_id));
    }

    #[test]
    fn purge_keeps_only_unexpired_entries() {
        let mut map = HashMap::new();
        map.insert(
            "stale".to_string(),
            ResetRequest {
                user_id: 1,
                otp: "111111".into(),
                expires_at: SystemTime::now() - Duration::from_secs(1),
            },
        );
        map.insert(
            "live".to_string(),
            ResetRequest {
                user_id: 2,
                otp: "222222".into(),
                expires_at: SystemTime::now() + Duration::from_secs(60),
            },
        );
        purge_expired(&mut map, |r| r.expires_at);
        assert!(!map.contains_key("stale"));
        assert!(map.contains_key("live"));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..32 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn tokens_are_32_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
