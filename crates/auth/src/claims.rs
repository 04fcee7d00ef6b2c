use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scf_core::{EntityId, Role, UserId};

/// JWT claims model (transport-agnostic).
///
/// This is the minimal set of claims the marketplace expects once a token has
/// been decoded and its signature verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Role the user acts in for this session.
    pub role: Role,

    /// Business entity the user acts for. Required for every role but admin.
    #[serde(default)]
    pub entity_id: Option<EntityId>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("{0} token carries no entity_id")]
    MissingEntity(Role),

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only; signature verification lives in
/// [`crate::jwt`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    if claims.role != Role::Admin && claims.entity_id.is_none() {
        return Err(TokenValidationError::MissingEntity(claims.role));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(role: Role, entity_id: Option<EntityId>) -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: UserId::new(),
            role,
            entity_id,
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn admin_tokens_need_no_entity() {
        assert_eq!(validate_claims(&claims(Role::Admin, None), Utc::now()), Ok(()));
    }

    #[test]
    fn party_tokens_need_an_entity() {
        assert_eq!(
            validate_claims(&claims(Role::Buyer, None), Utc::now()),
            Err(TokenValidationError::MissingEntity(Role::Buyer))
        );
        assert!(validate_claims(&claims(Role::Buyer, Some(EntityId::new())), Utc::now()).is_ok());
    }

    #[test]
    fn expired_and_future_tokens_are_rejected() {
        let c = claims(Role::Admin, None);
        assert_eq!(
            validate_claims(&c, c.expires_at),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&c, c.issued_at - Duration::seconds(1)),
            Err(TokenValidationError::NotYetValid)
        );
    }
}
