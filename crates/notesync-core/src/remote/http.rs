//! HTTP/JSON client for the remote notes service.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::models::{Entry, EntryContent, SyncId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::wire::{parse_add_response, parse_entry_list, parse_entry_record, WireEntry};
use super::{RemoteClient, RemoteEntry, RemoteError, RemoteResult};

/// HTTP client for a per-user entry collection.
///
/// Routes, relative to the base URL:
/// `POST/GET /users/{user}/entries`, `GET/PUT/DELETE /users/{user}/entries/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    /// Builds a client with an explicit per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|error| {
                RemoteError::InvalidConfiguration(format!(
                    "Failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self { base_url, client })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, user_id: &str) -> String {
        format!(
            "{}/users/{}/entries",
            self.base_url,
            urlencoding::encode(user_id)
        )
    }

    fn entry_url(&self, user_id: &str, sync_id: &SyncId) -> String {
        format!(
            "{}/{}",
            self.collection_url(user_id),
            urlencoding::encode(sync_id.as_str())
        )
    }
}

impl RemoteClient for HttpRemoteClient {
    async fn add(&self, user_id: &str, entry: &Entry) -> RemoteResult<SyncId> {
        let response = self
            .client
            .post(self.collection_url(user_id))
            .header("Accept", "application/json")
            .json(&WireEntry::for_add(entry))
            .send()
            .await?;
        let body = ensure_success(response, None).await?.text().await?;
        parse_add_response(&body)
    }

    async fn update(
        &self,
        user_id: &str,
        sync_id: &SyncId,
        content: &EntryContent,
    ) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.entry_url(user_id, sync_id))
            .header("Accept", "application/json")
            .json(&WireEntry::from_content(content))
            .send()
            .await?;
        ensure_success(response, Some(sync_id)).await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, sync_id: &SyncId) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.entry_url(user_id, sync_id))
            .send()
            .await?;
        ensure_success(response, Some(sync_id)).await?;
        Ok(())
    }

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let response = self
            .client
            .get(self.collection_url(user_id))
            .header("Accept", "application/json")
            .send()
            .await?;
        let body = ensure_success(response, None).await?.text().await?;
        parse_entry_list(&body)
    }

    async fn get(&self, user_id: &str, sync_id: &SyncId) -> RemoteResult<Option<RemoteEntry>> {
        let response = self
            .client
            .get(self.entry_url(user_id, sync_id))
            .header("Accept", "application/json")
            .send()
            .await?;
        match ensure_success(response, Some(sync_id)).await {
            Ok(response) => parse_entry_record(&response.text().await?).map(Some),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Turn non-2xx responses into errors; 404 on an addressed record becomes `NotFound`.
async fn ensure_success(response: Response, sync_id: Option<&SyncId>) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(sync_id) = sync_id {
            return Err(RemoteError::NotFound(sync_id.clone()));
        }
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpRemoteClient {
        HttpRemoteClient::new("https://notes.example.com/api/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("notes.example.com".to_string()).is_err());
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(client().base_url(), "https://notes.example.com/api");
    }

    #[test]
    fn urls_encode_path_segments() {
        let client = client();
        assert_eq!(
            client.collection_url("alice@example.com"),
            "https://notes.example.com/api/users/alice%40example.com/entries"
        );
        assert_eq!(
            client.entry_url("alice", &SyncId::new("a/b")),
            "https://notes.example.com/api/users/alice/entries/a%2Fb"
        );
    }

    #[test]
    fn api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message": "title required"}"#),
            "title required"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }
}
