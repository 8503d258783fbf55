//! JWT bearer-credential verification.

use crate::collab::{IdentityVerifier, UserIdentity};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> AppResult<UserIdentity> {
        let data = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| AppError::Authentication(format!("invalid token: {e}")))?;
        let display_name = data
            .claims
            .name
            .unwrap_or_else(|| data.claims.sub.to_string());
        Ok(UserIdentity {
            user_id: data.claims.sub,
            display_name,
        })
    }
}
