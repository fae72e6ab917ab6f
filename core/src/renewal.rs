//! Session renewal.
//!
//! # Design
//! The backend rotates the session cookie on `POST /refresh`; nothing comes
//! back as data. Renewals are single-flight: every request notes the current
//! [`Generation`] before its first exchange, and a request that later needs
//! a renewal only issues one if no renewal has completed since that note.
//! Otherwise it adopts the outcome of the renewal that already ran, so a
//! burst of requests failing on the same expired session costs one renewal.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{ErrorCode, RenewalError};
use crate::http::{CredentialMode, HttpMethod, HttpRequest, RequestBody};
use crate::transport::Transport;

/// Path of the renewal endpoint.
pub const REFRESH_PATH: &str = "/refresh";

/// Count of renewals completed so far, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug, Default)]
struct State {
    completed: u64,
    last: Option<Result<(), RenewalError>>,
}

/// Issues and deduplicates renewal exchanges.
#[derive(Debug, Default)]
pub struct RenewalCoordinator {
    generation: AtomicU64,
    state: Mutex<State>,
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation a request should remember before it is sent.
    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Renew the session unconditionally, unless another renewal is already
    /// running, in which case its outcome is shared.
    pub async fn renew<T>(&self, transport: &T, config: &Config) -> Result<(), RenewalError>
    where
        T: Transport + ?Sized,
    {
        let observed = self.generation();
        self.renew_after(observed, transport, config).await
    }

    /// Renew the session for a request sent at generation `observed`.
    ///
    /// If a renewal has completed since `observed`, its outcome is returned
    /// without contacting the backend.
    pub async fn renew_after<T>(
        &self,
        observed: Generation,
        transport: &T,
        config: &Config,
    ) -> Result<(), RenewalError>
    where
        T: Transport + ?Sized,
    {
        let mut state = self.state.lock().await;

        if state.completed > observed.0 {
            if let Some(last) = &state.last {
                debug!(
                    generation = state.completed,
                    ok = last.is_ok(),
                    "adopting concurrent renewal outcome"
                );
                return last.clone();
            }
        }

        let outcome = refresh(transport, config).await;
        state.completed += 1;
        state.last = Some(outcome.clone());
        self.generation.store(state.completed, Ordering::Release);
        outcome
    }
}

/// One renewal exchange: credentialed `POST /refresh`, no body, body ignored.
async fn refresh<T>(transport: &T, config: &Config) -> Result<(), RenewalError>
where
    T: Transport + ?Sized,
{
    let request = HttpRequest {
        method: HttpMethod::Post,
        url: config.resolve(REFRESH_PATH),
        headers: Vec::new(),
        credentials: CredentialMode::Include,
        body: RequestBody::Empty,
    };

    debug!(url = %request.url, "requesting new session");
    let response = match transport.execute(&request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "session renewal failed");
            return Err(RenewalError::Network(e));
        }
    };

    if response.is_success() {
        info!(status = response.status, "session renewed");
        return Ok(());
    }

    error!(status = response.status, "session renewal rejected");
    Err(RenewalError::Rejected {
        status: response.status,
        code: ErrorCode::from_body(&response.body),
        body: response.body,
    })
}
