//! Async API client for the ms-ai backend with transparent session renewal.
//!
//! # Overview
//! `ApiClient` sends JSON or multipart requests to the backend. When a
//! request fails because the session expired (backend code `401003`), the
//! client renews the session with `POST /refresh` and replays the request
//! once. Any other failure is returned as-is.
//!
//! # Design
//! - `Config` is resolved once and injected; the client never reads the
//!   environment on its own.
//! - The session credential lives in the `Transport` (a cookie jar for the
//!   default reqwest transport) and is never inspected here.
//! - Renewals are single-flight across concurrent requests.
//! - JSON and multipart bodies share one dispatch path through
//!   `BodyEncoding`.

pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod renewal;
pub mod resources;
pub mod transport;
pub mod types;

pub use body::{BodyEncoding, EncodedBody, Json, NoBody};
pub use client::ApiClient;
pub use config::{Config, BASE_URL_ENV, DEFAULT_BASE_URL};
pub use error::{
    ApiError, ConfigError, ErrorCode, RenewalError, StatusCategory, TransportError,
    SESSION_EXPIRED_CODE,
};
pub use http::{
    CredentialMode, FormPart, HttpMethod, HttpRequest, HttpResponse, MultipartForm, RequestBody,
};
pub use renewal::{RenewalCoordinator, REFRESH_PATH};
pub use transport::{ReqwestTransport, Transport};
pub use types::{EmailSubscription, FindManager, GithubToken, Manager, NewAddressee, Repository};
