use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::time::epoch_secs;
use crate::user::Role;

/// Lifetime of a room-access token.
pub const ROOM_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Lifetime of an identity token (no room binding).
pub const IDENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long before expiry a live session starts minting a replacement.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(2 * 60);

/// `iss` claim stamped on every token.
pub const ISSUER: &str = "huddle-server";

/// Claims carried by huddle bearer tokens. Room-access tokens bind a
/// `code`; identity tokens carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

#[derive(Debug)]
pub enum TokenError {
    Encode(jsonwebtoken::errors::Error),
    Invalid(jsonwebtoken::errors::Error),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "failed to sign token: {e}"),
            Self::Invalid(e) => write!(f, "invalid or expired token: {e}"),
        }
    }
}

impl std::error::Error for TokenError {}

fn issue(claims: &Claims, secret: &[u8]) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(TokenError::Encode)
}

/// Issue a room-access token (15 min) bound to a single room.
pub fn issue_room_token(
    user_id: &str,
    room_code: &str,
    role: Role,
    secret: &[u8],
) -> Result<String, TokenError> {
    issue_room_token_with_ttl(user_id, room_code, role, secret, ROOM_ACCESS_TTL)
}

/// Issue a room-access token with an explicit lifetime.
pub fn issue_room_token_with_ttl(
    user_id: &str,
    room_code: &str,
    role: Role,
    secret: &[u8],
    ttl: Duration,
) -> Result<String, TokenError> {
    let now = epoch_secs();
    issue(
        &Claims {
            id: user_id.to_string(),
            code: Some(room_code.to_string()),
            role,
            exp: now + ttl.as_secs() as i64,
            iat: now,
            iss: ISSUER.to_string(),
        },
        secret,
    )
}

/// Issue an identity token (24 h) with no room binding.
pub fn issue_identity_token(user_id: &str, role: Role, secret: &[u8]) -> Result<String, TokenError> {
    let now = epoch_secs();
    issue(
        &Claims {
            id: user_id.to_string(),
            code: None,
            role,
            exp: now + IDENTITY_TTL.as_secs() as i64,
            iat: now,
            iss: ISSUER.to_string(),
        },
        secret,
    )
}

/// Parse and validate a token. Only HMAC-SHA256 signatures are accepted;
/// tokens signed with any other method fail, as do tokens without a valid
/// future `exp`.
pub fn parse_token(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);
    validation.leeway = 0;
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(TokenError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-signing-secret";

    #[test]
    fn room_token_round_trips() {
        let token = issue_room_token("guest_a1B2c3", "aB3xY9", Role::Guest, SECRET).unwrap();
        let claims = parse_token(&token, SECRET).unwrap();

        assert_eq!(claims.id, "guest_a1B2c3");
        assert_eq!(claims.code.as_deref(), Some("aB3xY9"));
        assert_eq!(claims.role, Role::Guest);
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.exp - claims.iat, ROOM_ACCESS_TTL.as_secs() as i64);
    }

    #[test]
    fn identity_token_has_no_room_binding() {
        let token = issue_identity_token("u-42", Role::Registered, SECRET).unwrap();
        let claims = parse_token(&token, SECRET).unwrap();

        assert!(claims.code.is_none());
        assert_eq!(claims.exp - claims.iat, IDENTITY_TTL.as_secs() as i64);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_room_token("guest_a1B2c3", "aB3xY9", Role::Guest, SECRET).unwrap();
        assert!(parse_token(&token, b"other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = epoch_secs();
        let claims = Claims {
            id: "guest_a1B2c3".into(),
            code: Some("aB3xY9".into()),
            role: Role::Guest,
            exp: now - 600,
            iat: now - 1500,
            iss: ISSUER.into(),
        };
        let token = issue(&claims, SECRET).unwrap();
        assert!(parse_token(&token, SECRET).is_err());
    }

    #[test]
    fn unexpected_signing_method_is_rejected() {
        let claims = Claims {
            id: "guest_a1B2c3".into(),
            code: None,
            role: Role::Guest,
            exp: epoch_secs() + 600,
            iat: epoch_secs(),
            iss: ISSUER.into(),
        };
        let hs512 = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(parse_token(&hs512, SECRET).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(parse_token("not-a-token", SECRET).is_err());
        assert!(parse_token("", SECRET).is_err());
    }
}
