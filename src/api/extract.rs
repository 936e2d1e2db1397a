//! Extractors that report rejections through the JSON error envelope.

use axum::{
    async_trait,
    body::HttpBody,
    extract::{Form, FromRequest, Path, Query, RequestParts},
    http::header::CONTENT_TYPE,
    BoxError, Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A request body sent as JSON or as a url-encoded form.
pub struct Payload<T>(pub T);

#[async_trait]
impl<T, B> FromRequest<B> for Payload<T>
where
    T: DeserializeOwned + Send,
    B: HttpBody + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with(FORM_CONTENT_TYPE));

        if is_form {
            let Form(value) = Form::<T>::from_request(req)
                .await
                .map_err(|e| AppError::bad_request(e.to_string()))?;
            Ok(Payload(value))
        } else {
            let Json(value) = Json::<T>::from_request(req)
                .await
                .map_err(|e| AppError::bad_request(e.to_string()))?;
            Ok(Payload(value))
        }
    }
}

/// Query string parameters.
pub struct Params<T>(pub T);

#[async_trait]
impl<T, B> FromRequest<B> for Params<T>
where
    T: DeserializeOwned + Send,
    B: Send,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request(req)
            .await
            .map(|Query(value)| Params(value))
            .map_err(|e| AppError::bad_request(e.to_string()))
    }
}

/// The single integer id segment of a route.
pub struct Id(pub i32);

#[async_trait]
impl<B: Send> FromRequest<B> for Id {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request(req)
            .await
            .map_err(|_| AppError::bad_request("invalid id"))?;

        raw.parse::<i32>()
            .map(Id)
            .map_err(|_| AppError::bad_request(format!("invalid id `{raw}`")))
    }
}
