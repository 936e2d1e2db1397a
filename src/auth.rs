use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequest, RequestParts},
    headers::{authorization::Bearer, Authorization},
    http::StatusCode,
    TypedHeader,
};
use jsonwebtoken::{
    errors::{ErrorKind, Result as JwtResult},
    DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    pub fn new(secret: &str) -> anyhow::Result<Keys> {
        anyhow::ensure!(!secret.trim().is_empty(), "JWT_SECRET must not be empty");
        Ok(Keys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    pub exp: u64,
}

pub fn generate_jwt(keys: &Keys, email: &str, exp: Duration) -> JwtResult<String> {
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            email: email.to_lowercase(),
            exp: jsonwebtoken::get_current_timestamp() + exp.as_secs(),
        },
        &keys.encoding,
    )
}

pub fn validate_jwt(keys: &Keys, token: &str) -> JwtResult<TokenData<Claims>> {
    jsonwebtoken::decode::<Claims>(token, &keys.decoding, &Validation::default())
}

/// Extractor for routes reserved to the admin panel.
pub struct AdminOnly(pub Claims);

#[async_trait]
impl<B: Send> FromRequest<B> for AdminOnly {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| AppError::from(StatusCode::UNAUTHORIZED, "No token provided"))?;

        let keys = req
            .extensions()
            .get::<Arc<Keys>>()
            .ok_or_else(|| anyhow::anyhow!("jwt keys are missing from request extensions"))?;

        match validate_jwt(keys, bearer.token()) {
            Ok(data) => Ok(AdminOnly(data.claims)),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                Err(AppError::from(StatusCode::UNAUTHORIZED, "Token expired"))
            }
            Err(_) => Err(AppError::from(StatusCode::UNAUTHORIZED, "Invalid token")),
        }
    }
}
