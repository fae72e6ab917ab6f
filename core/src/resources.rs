//! Typed call sites for the backend resources.
//!
//! Each method only assembles a path and payload and hands them to
//! [`ApiClient`]. All of them send the session credential.

use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::body::NoBody;
use crate::client::ApiClient;
use crate::error::ApiError;
use crate::http::{CredentialMode, HttpMethod, MultipartForm};
use crate::transport::Transport;
use crate::types::{
    EmailSubscription, FindManager, GithubToken, Manager, NewAddressee, Repository,
};

/// Multipart submission endpoint.
pub const DOCUMENTS_PATH: &str = "/documents";

fn query_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Percent-encode a single path segment. Unlike a query value, a space
/// becomes `%20` and `+` is escaped.
fn path_segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

impl<T: Transport> ApiClient<T> {
    pub async fn login(&self, manager_id: i64) -> Result<Manager, ApiError> {
        self.send_json(
            "/manager/find",
            HttpMethod::Post,
            CredentialMode::Include,
            Some(&FindManager { manager_id }),
        )
        .await
    }

    pub async fn repositories(&self, manager_id: i64) -> Result<Vec<Repository>, ApiError> {
        let path = format!("/repositories?manager_id={manager_id}");
        self.send(&path, HttpMethod::Get, CredentialMode::Include, NoBody)
            .await
    }

    pub async fn repository(
        &self,
        repository_id: &str,
        manager_id: i64,
    ) -> Result<Repository, ApiError> {
        let path = format!(
            "/repositories/{}?manager_id={manager_id}",
            path_segment(repository_id)
        );
        self.send(&path, HttpMethod::Get, CredentialMode::Include, NoBody)
            .await
    }

    pub async fn add_addressee<R: DeserializeOwned>(
        &self,
        repository_id: i64,
        name: &str,
        email: &str,
    ) -> Result<R, ApiError> {
        let body = NewAddressee {
            name: name.to_string(),
            email: email.to_string(),
        };
        self.send_json(
            &format!("/repositories/{repository_id}/addressee"),
            HttpMethod::Post,
            CredentialMode::Include,
            Some(&body),
        )
        .await
    }

    pub async fn delete_addressee<R: DeserializeOwned>(
        &self,
        repository_id: i64,
        email: &str,
    ) -> Result<R, ApiError> {
        let path = format!(
            "/repositories/{repository_id}/addressees?email={}",
            query_value(email)
        );
        self.send(&path, HttpMethod::Delete, CredentialMode::Include, NoBody)
            .await
    }

    pub async fn update_email_subscription<R: DeserializeOwned>(
        &self,
        manager_id: i64,
        repository_id: i64,
        email_sub: bool,
    ) -> Result<R, ApiError> {
        self.send_json(
            &format!("/manager/{manager_id}/repositories/{repository_id}/email-sub"),
            HttpMethod::Patch,
            CredentialMode::Include,
            Some(&EmailSubscription { email_sub }),
        )
        .await
    }

    pub async fn register_token<R: DeserializeOwned>(&self, token: &str) -> Result<R, ApiError> {
        self.send_json(
            "/set-github-token",
            HttpMethod::Post,
            CredentialMode::Include,
            Some(&GithubToken {
                token: token.to_string(),
            }),
        )
        .await
    }

    pub async fn submit_document<R: DeserializeOwned>(
        &self,
        form: MultipartForm,
    ) -> Result<R, ApiError> {
        self.send_form(DOCUMENTS_PATH, HttpMethod::Post, CredentialMode::Include, form)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(query_value("a+b@example.com"), "a%2Bb%40example.com");
        assert_eq!(query_value("plain"), "plain");
    }

    #[test]
    fn path_segments_escape_spaces_and_separators() {
        assert_eq!(path_segment("ms ai"), "ms%20ai");
        assert_eq!(path_segment("a+b/c"), "a%2Bb%2Fc");
        assert_eq!(path_segment("repo-1.x_y~z"), "repo-1.x_y~z");
    }
}
