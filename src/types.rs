//! Core data types: transferables, negotiated object resources, and links.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::collaborators::LegacyNegotiator;
use crate::error::QueueError;

/// Direction of a transfer queue, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_action(self) -> TransferAction {
        match self {
            Direction::Upload => TransferAction::Upload,
            Direction::Download => TransferAction::Download,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// The action kind an object resource's link map is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Download,
    Upload,
}

/// Protocol-specific link information for one action on one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// A per-object error returned alongside a negotiation result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectError {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// The `{oid, size}` pair sent to the metadata call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub oid: String,
    pub size: u64,
}

/// The negotiated descriptor returned by the remote for one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectResource {
    pub oid: String,
    pub size: u64,
    #[serde(default)]
    pub error: Option<ObjectError>,
    #[serde(default)]
    pub actions: HashMap<TransferAction, Link>,
}

impl ObjectResource {
    /// Whether this object carries an action link for the given direction.
    pub fn has_action(&self, direction: Direction) -> bool {
        self.actions.contains_key(&direction.as_action())
    }
}

/// One unit of work submitted by the caller: upload or download one OID.
///
/// Cloning a `Transferable` shares its negotiated resource slot and its
/// legacy-negotiation capability; it does not create an independent copy
/// of pending work.
#[derive(Clone)]
pub struct Transferable {
    pub oid: String,
    pub size: u64,
    pub name: String,
    pub path: PathBuf,
    resource: Arc<Mutex<Option<ObjectResource>>>,
    legacy: Arc<dyn LegacyNegotiator>,
}

impl Transferable {
    pub fn new(
        oid: impl Into<String>,
        size: u64,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        legacy: Arc<dyn LegacyNegotiator>,
    ) -> Self {
        Self {
            oid: oid.into(),
            size,
            name: name.into(),
            path: path.into(),
            resource: Arc::new(Mutex::new(None)),
            legacy,
        }
    }

    /// Attach the negotiated object resource (populated after negotiation).
    pub fn set_resource(&self, resource: ObjectResource) {
        *self.resource.lock() = Some(resource);
    }

    pub fn resource(&self) -> Option<ObjectResource> {
        self.resource.lock().clone()
    }

    /// Perform this object's single-object (legacy) negotiation.
    pub async fn negotiate_legacy(&self, direction: Direction) -> Result<ObjectResource, QueueError> {
        self.legacy.negotiate(&self.oid, self.size, direction).await
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transferable")
            .field("oid", &self.oid)
            .field("size", &self.size)
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl PartialEq for Transferable {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
    }
}

impl Eq for Transferable {}

/// A job handed to the adapter: what to move and where to put it.
#[derive(Clone, Debug)]
pub struct TransferJob {
    pub name: String,
    pub resource: ObjectResource,
    pub path: PathBuf,
}

/// One result emitted by an adapter for a single job.
#[derive(Clone, Debug)]
pub struct TransferResult {
    pub oid: String,
    pub error: Option<QueueError>,
}

/// Maximum number of transferables grouped into one negotiation batch.
pub const BATCH_SIZE: usize = 100;

/// Number of extra attempts permitted per OID beyond the initial one.
pub const MAX_RETRIES: u32 = 1;

#[cfg(test)]
mod wire_tests {
    use super::*;

    /// A `MetadataClient` implementation talks JSON over HTTP to the
    /// remote; `ObjectResource`'s `serde` shape is what it decodes into.
    /// These round-trips pin the wire contract from §6: an action key of
    /// `download`/`upload`, an absent `error` or `actions` map deserializing
    /// to empty/none rather than failing, and an action map entry present
    /// only for the kinds the remote actually returned.
    #[test]
    fn object_resource_round_trips_through_json() {
        let mut actions = HashMap::new();
        actions.insert(
            TransferAction::Download,
            Link {
                href: "https://example.test/a".to_string(),
                header: HashMap::new(),
                expires_at: Some("2026-08-01T00:00:00Z".to_string()),
            },
        );
        let resource = ObjectResource {
            oid: "a".to_string(),
            size: 42,
            error: None,
            actions,
        };

        let json = serde_json::to_string(&resource).unwrap();
        assert!(json.contains("\"download\""));
        let decoded: ObjectResource = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.oid, "a");
        assert!(decoded.has_action(Direction::Download));
        assert!(!decoded.has_action(Direction::Upload));
    }

    #[test]
    fn object_resource_without_error_or_actions_decodes_from_minimal_json() {
        let json = r#"{"oid":"c","size":5}"#;
        let decoded: ObjectResource = serde_json::from_str(json).unwrap();
        assert!(decoded.error.is_none());
        assert!(!decoded.has_action(Direction::Download));
        assert!(!decoded.has_action(Direction::Upload));
    }

    #[test]
    fn per_object_error_decodes_alongside_a_missing_actions_map() {
        let json = r#"{"oid":"b","size":0,"error":{"code":404,"message":"not found"}}"#;
        let decoded: ObjectResource = serde_json::from_str(json).unwrap();
        let err = decoded.error.expect("error should decode");
        assert_eq!(err.code, 404);
        assert_eq!(err.message, "not found");
    }

    #[test]
    fn object_descriptor_serializes_as_the_oid_size_pair_sent_to_negotiate() {
        let descriptors = vec![
            ObjectDescriptor { oid: "a".to_string(), size: 10 },
            ObjectDescriptor { oid: "b".to_string(), size: 20 },
        ];
        let json = serde_json::to_value(&descriptors).unwrap();
        assert_eq!(json[0]["oid"], "a");
        assert_eq!(json[1]["size"], 20);
    }
}
