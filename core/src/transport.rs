//! The exchange primitive the client runs on.
//!
//! # Design
//! `ApiClient` only ever talks to a [`Transport`]. The transport owns the
//! session credential: it keeps the cookies the backend sets and attaches
//! them when, and only when, a request asks for `CredentialMode::Include`.
//! A non-2xx status is returned as an ordinary `HttpResponse`; only a failed
//! exchange becomes a `TransportError`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Url};
use tracing::trace;

use crate::error::TransportError;
use crate::http::{FormPart, HttpMethod, HttpRequest, HttpResponse, MultipartForm, RequestBody};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Executes one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request).await
    }
}

/// reqwest-backed transport with a cookie jar for the session credential.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Creates a transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a transport with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("msai-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: client,
            jar: Arc::new(Jar::default()),
        })
    }

    /// The cookie jar holding the session credential.
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|e| TransportError::new(format!("invalid URL {}: {e}", request.url)))?;

        let mut builder = self.inner.request(method(request.method), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.credentials.is_include() {
            if let Some(cookies) = self.jar.cookies(&url) {
                builder = builder.header(COOKIE, cookies);
            }
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(text) => builder.body(text.clone()),
            RequestBody::Multipart(form) => builder.multipart(multipart(form)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();

        if request.credentials.is_include() {
            let mut set_cookies = response.headers().get_all(SET_COOKIE).iter();
            self.jar.set_cookies(&mut set_cookies, &url);
        }

        let body = response.text().await?;
        trace!(status, bytes = body.len(), "exchange complete");

        Ok(HttpResponse { status, body })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Rebuild a reqwest form. Called per attempt: every attempt carries the same
/// parts in the same order, but reqwest draws a new random boundary for each
/// form it builds.
fn multipart(form: &MultipartForm) -> Result<Form, TransportError> {
    let mut out = Form::new();
    for part in form.parts() {
        out = match part {
            FormPart::Text { name, value } => out.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                content_type,
                data,
            } => {
                let mut file = Part::bytes(data.to_vec()).file_name(file_name.clone());
                if let Some(content_type) = content_type {
                    file = file.mime_str(content_type)?;
                }
                out.part(name.clone(), file)
            }
        };
    }
    Ok(out)
}
