use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::FailureKind;

pub const PARAM_LOCAL_PATH: &str = "localPath";
pub const PARAM_ZIP_ENTRY: &str = "zipEntry";
pub const PARAM_IGNORE: &str = "ignore";
pub const PARAM_UID: &str = "uid";

const FALLBACK_TRANSFER_NAME: &str = "package";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderIdentity {
    pub id: String,
    pub display_name: Option<String>,
}

impl SenderIdentity {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
        }
    }

    /// Display name when the sender announced one, otherwise the raw id.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.id.as_str())
    }
}

/// An inbound transfer offer as announced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub transfer_name: String,
    pub expected_hash: String,
    pub expected_byte_length: u64,
    pub sender: SenderIdentity,
}

impl TransferRequest {
    pub fn new(
        transfer_name: impl Into<String>,
        expected_hash: impl Into<String>,
        expected_byte_length: u64,
        sender: SenderIdentity,
    ) -> Self {
        let transfer_name = transfer_name.into();
        let trimmed = transfer_name.trim();
        Self {
            transfer_name: if trimmed.is_empty() {
                FALLBACK_TRANSFER_NAME.to_string()
            } else {
                trimmed.to_string()
            },
            expected_hash: expected_hash.into().trim().to_ascii_lowercase(),
            expected_byte_length,
            sender,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportInstructions {
    ImportDelete,
    #[default]
    ImportNoDelete,
    NoImportDelete,
    NoImportNoDelete,
}

impl ImportInstructions {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImportDelete => "ImportDelete",
            Self::ImportNoDelete => "ImportNoDelete",
            Self::NoImportDelete => "NoImportDelete",
            Self::NoImportNoDelete => "NoImportNoDelete",
        }
    }
}

impl Display for ImportInstructions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    MapItem,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEntry {
    pub kind: ContentKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ContentEntry {
    pub fn file(zip_entry: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(PARAM_ZIP_ENTRY.to_string(), zip_entry.into());
        Self {
            kind: ContentKind::File,
            parameters,
        }
    }

    pub fn map_item(uid: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(PARAM_UID.to_string(), uid.into());
        Self {
            kind: ContentKind::MapItem,
            parameters,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    pub fn remove_parameter(&mut self, key: &str) -> Option<String> {
        self.parameters.remove(key)
    }

    pub fn is_file(&self) -> bool {
        self.kind == ContentKind::File
    }

    pub fn is_ignore(&self) -> bool {
        self.parameter(PARAM_IGNORE)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    pub fn local_path(&self) -> Option<&str> {
        self.parameter(PARAM_LOCAL_PATH)
    }

    pub fn uid(&self) -> Option<&str> {
        self.parameter(PARAM_UID)
    }
}

/// Logical description of a package and the policy to apply to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ContentEntry>,
    #[serde(default)]
    pub import_instructions: ImportInstructions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_receive_action: Option<String>,
    /// Local path of the package file once it has been received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Manifest {
    pub fn is_valid(&self) -> bool {
        !self.uid.trim().is_empty() && !self.name.trim().is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &ContentEntry> {
        self.entries.iter().filter(|entry| entry.is_file())
    }

    pub fn map_items(&self) -> impl Iterator<Item = &ContentEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == ContentKind::MapItem)
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    pub fn map_item_count(&self) -> usize {
        self.map_items().count()
    }

    pub fn post_receive_action(&self) -> Option<&str> {
        self.post_receive_action
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// A previously saved package known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub user_label: String,
    pub content_hash: String,
    pub file_path: String,
    pub sender_name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferLogDirection {
    Received,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLogEntry {
    pub direction: TransferLogDirection,
    pub label: String,
    pub description: String,
    pub size_bytes: u64,
    pub at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub hae: Option<f64>,
}

impl EventPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A single structured event delivered without a package around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleEvent {
    pub uid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<EventPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl SingleEvent {
    pub fn is_valid(&self) -> bool {
        !self.uid.trim().is_empty()
            && !self.event_type.trim().is_empty()
            && self.point.is_none_or(|point| point.is_valid())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rx-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "uid")]
pub enum FocusTarget {
    Package(String),
    MapItem(String),
    Event(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub correlation_id: CorrelationId,
    /// `None` while the total size is unknown.
    pub percent: Option<u8>,
    pub speed_bps: u64,
    pub eta_seconds: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalNotice {
    pub correlation_id: CorrelationId,
    pub succeeded: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

#[cfg(test)]
#[path = "../tests/protocol/models_tests.rs"]
mod tests;
