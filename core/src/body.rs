//! Body serialization strategies.
//!
//! `ApiClient::send` accepts anything implementing [`BodyEncoding`]. JSON
//! payloads are encoded exactly once, before the first attempt, so the
//! retry after a renewal reuses the same bytes. Multipart forms pass
//! through untouched for the transport to encode.

use serde::Serialize;

use crate::error::ApiError;
use crate::http::{MultipartForm, RequestBody};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Body plus the headers its encoding requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBody {
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// Turns a caller payload into a request body.
pub trait BodyEncoding {
    fn encode(self) -> Result<EncodedBody, ApiError>;
}

/// A request without a body.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBody;

impl BodyEncoding for NoBody {
    fn encode(self) -> Result<EncodedBody, ApiError> {
        Ok(EncodedBody::default())
    }
}

/// A JSON-encoded body.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(pub T);

impl<T: Serialize> BodyEncoding for Json<T> {
    fn encode(self) -> Result<EncodedBody, ApiError> {
        let text = serde_json::to_string(&self.0).map_err(ApiError::Serialization)?;
        Ok(EncodedBody {
            headers: vec![("content-type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: RequestBody::Json(text),
        })
    }
}

/// `None` sends no body at all, matching a call site that passes no payload.
impl<T: Serialize> BodyEncoding for Option<Json<T>> {
    fn encode(self) -> Result<EncodedBody, ApiError> {
        match self {
            Some(json) => json.encode(),
            None => NoBody.encode(),
        }
    }
}

impl BodyEncoding for MultipartForm {
    fn encode(self) -> Result<EncodedBody, ApiError> {
        Ok(EncodedBody {
            headers: Vec::new(),
            body: RequestBody::Multipart(self),
        })
    }
}
