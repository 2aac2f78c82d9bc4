use rand::RngCore;
use sha2::{Digest, Sha256};

use lina_shared::{auth::Credentials, Session};

use crate::api::types::ApiError;
use crate::db::{Db, SessionRow, UserRow};

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Constant-time byte comparison for password hashes.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_credentials(creds: &Credentials) -> Result<(), ApiError> {
    let email = normalize_email(&creds.email);
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email {
        return Err(ApiError::bad_request("INVALID_EMAIL", "Email address is not valid"));
    }
    if creds.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(
            "WEAK_PASSWORD",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

pub fn issue_session(db: &Db, user_id: &str, email: &str, ttl_secs: i64, now: i64) -> anyhow::Result<Session> {
    let session = Session {
        access_token: new_token(),
        refresh_token: new_token(),
        user_id: user_id.to_string(),
        email: email.to_string(),
        expires_at: now + ttl_secs,
    };

    db.insert_session(&SessionRow {
        access_token: session.access_token.clone(),
        refresh_token: session.refresh_token.clone(),
        user_id: session.user_id.clone(),
        expires_at: session.expires_at,
    })?;

    Ok(session)
}

pub fn sign_up(db: &Db, creds: &Credentials, ttl_secs: i64, now: i64) -> Result<Session, ApiError> {
    validate_credentials(creds)?;

    let email = normalize_email(&creds.email);
    let salt = new_salt();
    let user = UserRow {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.clone(),
        password_hash: hash_password(&creds.password, &salt),
        salt,
    };

    if !db.create_user(&user)? {
        return Err(ApiError::conflict("EMAIL_TAKEN", "An account with this email already exists"));
    }

    tracing::info!(user_id = %user.id, "User signed up");
    Ok(issue_session(db, &user.id, &email, ttl_secs, now)?)
}

pub fn sign_in(db: &Db, creds: &Credentials, ttl_secs: i64, now: i64) -> Result<Session, ApiError> {
    let invalid = || ApiError::unauthorized("INVALID_CREDENTIALS", "Invalid login credentials");

    let email = normalize_email(&creds.email);
    let user = db.find_user_by_email(&email)?.ok_or_else(invalid)?;

    let candidate = hash_password(&creds.password, &user.salt);
    if !constant_time_eq(candidate.as_bytes(), user.password_hash.as_bytes()) {
        return Err(invalid());
    }

    Ok(issue_session(db, &user.id, &user.email, ttl_secs, now)?)
}

/// Exchange a refresh token for a new session. The old refresh token is
/// revoked; its access token keeps working until it expires so requests
/// already in flight are not rejected.
pub fn refresh(db: &Db, refresh_token: &str, ttl_secs: i64, now: i64) -> Result<Session, ApiError> {
    let invalid = || ApiError::unauthorized("INVALID_REFRESH_TOKEN", "Refresh token is invalid or already used");

    let user_id = db.redeem_refresh_token(refresh_token)?.ok_or_else(invalid)?;
    let email = db.user_email(&user_id)?.ok_or_else(invalid)?;

    tracing::debug!(user_id = %user_id, "Session refreshed");
    Ok(issue_session(db, &user_id, &email, ttl_secs, now)?)
}

/// Resolve an `Authorization` header value to a user id.
pub fn resolve_bearer(db: &Db, header: Option<&str>, now: i64) -> Result<String, ApiError> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("UNAUTHORIZED", "Missing bearer token"))?;

    let (user_id, expires_at) = db
        .find_session(token)?
        .ok_or_else(|| ApiError::unauthorized("UNAUTHORIZED", "Invalid bearer token"))?;

    if now >= expires_at {
        return Err(ApiError::unauthorized("SESSION_EXPIRED", "Session has expired"));
    }

    Ok(user_id)
}
