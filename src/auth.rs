//! Access-token verification.
//!
//! Token issuance lives outside this core; subscribers present an HS256
//! access token and the connection manager only needs the verified principal.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The authenticated caller as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub role: Option<String>,
}

pub fn verify_access_token(secret: &str, token: &str) -> Result<Principal> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| Error::AuthRequired)?;

    let user_id = data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| Error::AuthRequired)?;

    Ok(Principal {
        user_id,
        role: data.claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as usize;
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
                role: Some("coordinator".to_string()),
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_principal() {
        let principal = verify_access_token("s3cret", &token("s3cret", "42", 3600)).unwrap();
        assert_eq!(principal.user_id, 42);
        assert_eq!(principal.role.as_deref(), Some("coordinator"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        assert!(verify_access_token("other", &token("s3cret", "42", 3600)).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        assert!(verify_access_token("s3cret", &token("s3cret", "42", -3600)).is_err());
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        assert!(verify_access_token("s3cret", &token("s3cret", "admin", 3600)).is_err());
    }
}
