//! Request payloads and response DTOs for the backend resources.
//!
//! The backend speaks camelCase JSON. Response types keep unknown fields in
//! `extra` so callers do not lose data the client does not model.

use serde::{Deserialize, Serialize};

/// `POST /manager/find`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FindManager {
    pub manager_id: i64,
}

/// `POST /repositories/{id}/addressee`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAddressee {
    pub name: String,
    pub email: String,
}

/// `PATCH /manager/{m}/repositories/{r}/email-sub`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmailSubscription {
    pub email_sub: bool,
}

/// `POST /set-github-token`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GithubToken {
    pub token: String,
}

/// The signed-in manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manager {
    pub id: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A repository watched by a manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
