//! JSON wire format of the remote notes service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Entry, EntryContent, SyncId};

use super::{RemoteEntry, RemoteError, RemoteResult};

/// An entry as sent to and received from the remote service.
///
/// `id`, `client_id` and `extra` are transport bookkeeping; only the remaining
/// fields become [`EntryContent`] and take part in conflict comparison.
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntry {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<SyncId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub edited: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub viewed: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl WireEntry {
    /// Payload for creating a record; carries the local ID as idempotency key.
    pub fn for_add(entry: &Entry) -> Self {
        let mut wire = Self::from_content(&entry.content);
        wire.client_id = Some(entry.id.as_str());
        wire
    }

    /// Payload carrying only user-visible fields.
    pub fn from_content(content: &EntryContent) -> Self {
        Self {
            id: None,
            client_id: None,
            title: content.title.clone(),
            description: content.description.clone(),
            color: content.color.clone(),
            created: content.created,
            edited: content.edited,
            viewed: content.viewed,
            image_url: content.image_url.clone(),
            extra: None,
        }
    }

    /// Strip transport keys, keeping the user-visible content.
    pub fn into_content(self) -> EntryContent {
        EntryContent {
            title: self.title,
            description: self.description,
            color: self.color,
            image_url: self.image_url,
            created: self.created,
            edited: self.edited,
            viewed: self.viewed,
        }
    }

    /// Convert a received record; records without an id are malformed.
    pub fn into_remote_entry(self) -> RemoteResult<RemoteEntry> {
        let sync_id = self
            .id
            .clone()
            .ok_or_else(|| RemoteError::Malformed("entry is missing its id".to_string()))?;
        Ok(RemoteEntry::new(sync_id, self.into_content()))
    }
}

/// Remote ids arrive either as JSON strings or as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_sync_id(self) -> Option<SyncId> {
        match self {
            Self::Text(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| SyncId::new(text))
            }
            Self::Number(number) => Some(SyncId::new(number.to_string())),
        }
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<SyncId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.and_then(RawId::into_sync_id))
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<SyncId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntryList {
    Bare(Vec<serde_json::Value>),
    Wrapped { entries: Vec<serde_json::Value> },
}

/// Parse the body returned by `add`.
pub fn parse_add_response(body: &str) -> RemoteResult<SyncId> {
    let response: AddResponse = serde_json::from_str(body)
        .map_err(|error| RemoteError::Malformed(format!("invalid add response: {error}")))?;
    response
        .id
        .ok_or_else(|| RemoteError::Malformed("add response did not include an id".to_string()))
}

/// Parse the body returned by `get_all`: either a bare array or `{"entries": [...]}`.
///
/// Only a malformed envelope fails the call. Records that cannot be decoded
/// are logged and skipped.
pub fn parse_entry_list(body: &str) -> RemoteResult<Vec<RemoteEntry>> {
    let list: EntryList = serde_json::from_str(body)
        .map_err(|error| RemoteError::Malformed(format!("invalid entry list: {error}")))?;
    let items = match list {
        EntryList::Bare(items) | EntryList::Wrapped { entries: items } => items,
    };

    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match decode_list_item(item) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping remote record {}: {}", index, e),
        }
    }
    Ok(entries)
}

fn decode_list_item(item: serde_json::Value) -> RemoteResult<RemoteEntry> {
    let wire: WireEntry = serde_json::from_value(item)
        .map_err(|error| RemoteError::Malformed(format!("invalid entry: {error}")))?;
    wire.into_remote_entry()
}

/// Parse the body returned by `get`.
pub fn parse_entry_record(body: &str) -> RemoteResult<RemoteEntry> {
    let wire: WireEntry = serde_json::from_str(body)
        .map_err(|error| RemoteError::Malformed(format!("invalid entry: {error}")))?;
    wire.into_remote_entry()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::from_millis;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_payload_carries_client_id_and_camel_case_keys() {
        let entry = Entry::new(
            EntryContent::new("buy milk").with_image_url("https://img.example.com/1.png"),
        );
        let json = serde_json::to_value(WireEntry::for_add(&entry)).unwrap();

        assert_eq!(json["clientId"], entry.id.as_str());
        assert_eq!(json["imageUrl"], "https://img.example.com/1.png");
        assert_eq!(json["created"], entry.content.created.timestamp_millis());
        assert!(json.get("id").is_none());
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn numeric_and_string_ids_are_accepted() {
        assert_eq!(parse_add_response(r#"{"id": 42}"#).unwrap(), SyncId::new("42"));
        assert_eq!(
            parse_add_response(r#"{"id": "abc"}"#).unwrap(),
            SyncId::new("abc")
        );
        assert!(parse_add_response(r#"{"id": ""}"#).is_err());
        assert!(parse_add_response("{}").is_err());
        assert!(parse_add_response("not json").is_err());
    }

    #[test]
    fn transport_keys_are_stripped_before_comparison() {
        let body = r##"[
            {"id": 7, "title": "new", "description": "", "color": "#fff",
             "created": 1000, "edited": 2000, "viewed": 3000,
             "imageUrl": null, "extra": {"etag": "x"}, "owner": "alice"}
        ]"##;

        let entries = parse_entry_list(body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sync_id, SyncId::new("7"));
        assert_eq!(
            entries[0].content,
            EntryContent {
                title: "new".to_string(),
                description: String::new(),
                color: "#fff".to_string(),
                image_url: None,
                created: from_millis(1000),
                edited: from_millis(2000),
                viewed: from_millis(3000),
            }
        );
    }

    #[test]
    fn wrapped_entry_list_is_accepted() {
        let body = r#"{"entries": [{"id": "9", "title": "server only",
            "created": 1, "edited": 1, "viewed": 1}]}"#;
        let entries = parse_entry_list(body).unwrap();
        assert_eq!(entries[0].sync_id, SyncId::new("9"));
        assert_eq!(entries[0].content.title, "server only");
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let body = r#"[
            {"id": 1, "title": "good", "created": 1, "edited": 1, "viewed": 1},
            {"title": "no id", "created": 1, "edited": 1, "viewed": 1},
            {"id": 3, "title": "bad time", "created": "yesterday", "edited": 1, "viewed": 1},
            "not an object"
        ]"#;

        let entries = parse_entry_list(body).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sync_id, SyncId::new("1"));
        assert_eq!(entries[0].content.title, "good");
    }

    #[test]
    fn malformed_envelope_fails_the_list() {
        assert!(matches!(
            parse_entry_list(r#"{"items": []}"#),
            Err(RemoteError::Malformed(_))
        ));
        assert!(matches!(
            parse_entry_list("not json"),
            Err(RemoteError::Malformed(_))
        ));
    }

    #[test]
    fn record_without_id_is_malformed() {
        let body = r#"{"title": "x", "created": 1, "edited": 1, "viewed": 1}"#;
        assert!(matches!(
            parse_entry_record(body),
            Err(RemoteError::Malformed(_))
        ));
    }
}
