//! Request dispatcher with transparent session renewal.
//!
//! # Design
//! `ApiClient` prepares each logical request once and sends it. If the
//! backend answers with the session-expired code, the client renews the
//! session through the `RenewalCoordinator` and sends the very same prepared
//! request one more time. The retry's outcome is final: a second expiry is
//! returned to the caller rather than triggering another renewal.
//!
//! JSON and multipart requests share this path; they differ only in the
//! `BodyEncoding` used to prepare the body.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::body::{BodyEncoding, Json};
use crate::config::Config;
use crate::error::{ApiError, ErrorCode, RenewalError};
use crate::http::{CredentialMode, HttpMethod, HttpRequest, HttpResponse, MultipartForm};
use crate::renewal::RenewalCoordinator;
use crate::transport::{ReqwestTransport, Transport};

/// Async API client over a [`Transport`].
#[derive(Debug)]
pub struct ApiClient<T = ReqwestTransport> {
    config: Config,
    transport: T,
    renewal: RenewalCoordinator,
}

impl ApiClient<ReqwestTransport> {
    /// Client over the default reqwest transport.
    pub fn new(config: Config) -> Result<Self, ApiError> {
        Ok(Self::with_transport(config, ReqwestTransport::new()?))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        Self {
            config,
            transport,
            renewal: RenewalCoordinator::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a JSON request. `None` sends no body.
    pub async fn send_json<B, R>(
        &self,
        path: &str,
        method: HttpMethod,
        credentials: CredentialMode,
        body: Option<&B>,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(path, method, credentials, body.map(Json)).await
    }

    /// Send a multipart form request.
    pub async fn send_form<R>(
        &self,
        path: &str,
        method: HttpMethod,
        credentials: CredentialMode,
        form: MultipartForm,
    ) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        self.send(path, method, credentials, form).await
    }

    /// Send one logical request, renewing the session and retrying once if
    /// the backend reports it expired.
    pub async fn send<B, R>(
        &self,
        path: &str,
        method: HttpMethod,
        credentials: CredentialMode,
        body: B,
    ) -> Result<R, ApiError>
    where
        B: BodyEncoding,
        R: DeserializeOwned,
    {
        let request = self.prepare(path, method, credentials, body)?;
        let generation = self.renewal.generation();

        let err = match self.exchange(&request).await {
            Ok(response) => return parse(response),
            Err(err) => err,
        };
        if !matches!(err.code(), Some(ErrorCode::SessionExpired)) {
            return Err(err);
        }

        warn!(method = %request.method, url = %request.url, "session expired, renewing");
        self.renewal
            .renew_after(generation, &self.transport, &self.config)
            .await?;

        debug!(method = %request.method, url = %request.url, "retrying after renewal");
        parse(self.exchange(&request).await?)
    }

    /// Force a session renewal.
    pub async fn renew(&self) -> Result<(), RenewalError> {
        self.renewal.renew(&self.transport, &self.config).await
    }

    /// Build the request exchanged on every attempt.
    pub fn prepare<B: BodyEncoding>(
        &self,
        path: &str,
        method: HttpMethod,
        credentials: CredentialMode,
        body: B,
    ) -> Result<HttpRequest, ApiError> {
        let encoded = body.encode()?;
        Ok(HttpRequest {
            method,
            url: self.config.resolve(path),
            headers: encoded.headers,
            credentials,
            body: encoded.body,
        })
    }

    /// One physical exchange. Non-2xx responses become `ApiError::Domain`.
    async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        debug!(
            method = %request.method,
            url = %request.url,
            credentials = ?request.credentials,
            "request"
        );
        let response = self.transport.execute(request).await.map_err(|e| {
            warn!(method = %request.method, url = %request.url, error = %e, "request failed");
            ApiError::Network(e)
        })?;

        if response.is_success() {
            debug!(method = %request.method, url = %request.url, status = response.status, "response");
            return Ok(response);
        }

        let err = ApiError::from_response(response.status, response.body);
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            code = ?err.code(),
            "error response"
        );
        Err(err)
    }
}

/// Parse a 2xx body. An empty body reads as JSON `null`.
fn parse<R: DeserializeOwned>(response: HttpResponse) -> Result<R, ApiError> {
    let text = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(text).map_err(|source| ApiError::Deserialization {
        status: response.status,
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::error::{StatusCategory, TransportError};
    use crate::http::RequestBody;

    type Reply = Result<(u16, &'static str), &'static str>;

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<Reply>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Script {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }

        fn refreshes(&self) -> usize {
            self.seen()
                .iter()
                .filter(|r| r.url.ends_with("/refresh"))
                .count()
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            match reply {
                Ok((status, body)) => Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
                Err(msg) => Err(TransportError::new(msg)),
            }
        }
    }

    fn client(replies: Vec<Reply>) -> ApiClient<Arc<Script>> {
        ApiClient::with_transport(Config::default(), Arc::new(Script::new(replies)))
    }

    const EXPIRED: Reply = Ok((403, r#"{"code":"401003"}"#));

    #[tokio::test]
    async fn success_returns_parsed_body() {
        let c = client(vec![Ok((200, r#"[{"id":1}]"#))]);
        let out: Value = c
            .send_json::<(), _>(
                "/repositories?manager_id=7",
                HttpMethod::Get,
                CredentialMode::Include,
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, json!([{"id": 1}]));

        let seen = c.transport().seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "http://localhost:8080/repositories?manager_id=7");
        assert!(seen[0].body.is_empty());
        assert!(seen[0].headers.is_empty());
    }

    #[tokio::test]
    async fn omit_mode_is_passed_to_transport() {
        let c = client(vec![Ok((200, "{}"))]);
        let _: Value = c
            .send_json::<(), _>("/x", HttpMethod::Get, CredentialMode::Omit, None)
            .await
            .unwrap();
        assert_eq!(c.transport().seen()[0].credentials, CredentialMode::Omit);
    }

    #[tokio::test]
    async fn expired_session_renews_and_retries_identically() {
        let c = client(vec![EXPIRED, Ok((200, "")), Ok((200, r#"{"id":7}"#))]);
        let out: Value = c
            .send_json(
                "/manager/find",
                HttpMethod::Post,
                CredentialMode::Include,
                Some(&json!({"managerId": 7})),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"id": 7}));

        let seen = c.transport().seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].url, "http://localhost:8080/refresh");
        assert_eq!(seen[0], seen[2]);
        assert_eq!(
            seen[0].body,
            RequestBody::Json(r#"{"managerId":7}"#.to_string())
        );
    }

    #[tokio::test]
    async fn second_expiry_is_not_renewed_again() {
        let c = client(vec![EXPIRED, Ok((200, "")), EXPIRED]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(c.transport().refreshes(), 1);
        assert_eq!(c.transport().seen().len(), 3);
    }

    #[tokio::test]
    async fn renewal_failure_replaces_original_error() {
        let c = client(vec![EXPIRED, Ok((500, "oops"))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Renewal(RenewalError::Rejected { status: 500, .. })
        ));
        assert!(!err.is_session_expired());
        assert_eq!(c.transport().seen().len(), 2);
    }

    #[tokio::test]
    async fn renewal_network_failure_is_final() {
        let c = client(vec![EXPIRED, Err("connection reset")]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Renewal(RenewalError::Network(_))));
    }

    #[tokio::test]
    async fn other_codes_fail_without_renewal() {
        let c = client(vec![Ok((404, r#"{"code":"999999"}"#))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        match err {
            ApiError::Domain {
                status,
                category,
                code,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(category, StatusCategory::ClientError);
                assert_eq!(code, Some(ErrorCode::Other("999999".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.transport().refreshes(), 0);
    }

    #[tokio::test]
    async fn unparseable_error_body_fails_without_renewal() {
        let c = client(vec![Ok((502, "<html>bad gateway</html>"))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Domain {
                status: 502,
                code: None,
                ..
            }
        ));
        assert_eq!(c.transport().seen().len(), 1);
    }

    #[tokio::test]
    async fn array_error_body_fails_without_renewal() {
        let c = client(vec![Ok((400, r#"["401003"]"#))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Domain {
                status: 400,
                code: None,
                ..
            }
        ));
        assert_eq!(c.transport().seen().len(), 1);
        assert_eq!(c.transport().refreshes(), 0);
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let c = client(vec![Err("dns failure")]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(c.transport().seen().len(), 1);
    }

    #[tokio::test]
    async fn retry_failure_with_other_code_is_returned() {
        let c = client(vec![EXPIRED, Ok((200, "")), Ok((400, r#"{"code":"400001"}"#))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::Other("400001".to_string())));
    }

    #[tokio::test]
    async fn form_retry_replays_the_same_parts() {
        let c = client(vec![EXPIRED, Ok((204, "")), Ok((201, r#"{"ok":true}"#))]);
        let form = MultipartForm::new()
            .text("title", "notes")
            .file("file", "notes.md", Some("text/markdown"), &b"# hi"[..]);
        let out: Value = c
            .send_form("/documents", HttpMethod::Post, CredentialMode::Include, form.clone())
            .await
            .unwrap();
        assert_eq!(out, json!({"ok": true}));

        let seen = c.transport().seen();
        assert_eq!(seen[0], seen[2]);
        assert_eq!(seen[0].body, RequestBody::Multipart(form));
        assert_eq!(seen[0].header("content-type"), None);
    }

    #[tokio::test]
    async fn repeated_sends_are_independent() {
        let c = client(vec![Ok((200, r#"{"n":1}"#)), Ok((200, r#"{"n":1}"#))]);
        for _ in 0..2 {
            let out: Value = c
                .send_json::<(), _>("/x", HttpMethod::Get, CredentialMode::Omit, None)
                .await
                .unwrap();
            assert_eq!(out, json!({"n": 1}));
        }
        assert_eq!(c.transport().seen().len(), 2);
    }

    #[tokio::test]
    async fn empty_success_body_parses_as_unit() {
        let c = client(vec![Ok((204, ""))]);
        c.send_json::<(), ()>("/x", HttpMethod::Delete, CredentialMode::Include, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mismatched_success_body_is_a_deserialization_error() {
        let c = client(vec![Ok((200, "not json"))]);
        let err = c
            .send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Omit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Deserialization { status: 200, .. }));
    }

    /// Fails with the expiry code until a refresh has been seen.
    #[derive(Default)]
    struct Backend {
        refreshed: std::sync::atomic::AtomicBool,
        refreshes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Transport for Backend {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            use std::sync::atomic::Ordering;

            tokio::task::yield_now().await;
            let (status, body) = if request.url.ends_with("/refresh") {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                self.refreshed.store(true, Ordering::SeqCst);
                (200, String::new())
            } else if self.refreshed.load(Ordering::SeqCst) {
                (200, r#"{"ok":true}"#.to_string())
            } else {
                (403, r#"{"code":"401003"}"#.to_string())
            };
            Ok(HttpResponse {
                status,
                body,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_expiries_share_one_renewal() {
        let c = ApiClient::with_transport(Config::default(), Backend::default());
        let send = || c.send_json::<(), Value>("/x", HttpMethod::Get, CredentialMode::Include, None);

        let (a, b, d) = tokio::join!(send(), send(), send());
        assert!(a.is_ok() && b.is_ok() && d.is_ok());
        assert_eq!(
            c.transport()
                .refreshes
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn explicit_renew_uses_refresh_endpoint() {
        let c = client(vec![Ok((200, ""))]);
        c.renew().await.unwrap();
        assert_eq!(c.transport().refreshes(), 1);
    }
}
