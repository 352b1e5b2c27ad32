use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub const START_SESSION_PATH: &str = "/multipart/start/";
pub const COMPLETE_SESSION_PATH: &str = "/multipart/complete/";
pub const DIRECT_UPLOAD_PATH: &str = "/base/";

/// Form field names understood by the upload endpoint.
pub mod fields {
    pub const PUBLIC_KEY: &str = "UPLOADCARE_PUB_KEY";
    pub const STORE: &str = "UPLOADCARE_STORE";
    pub const FILENAME: &str = "filename";
    pub const SIZE: &str = "size";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const PART_SIZE: &str = "part_size";
    pub const UUID: &str = "uuid";

    /// Metadata entries are sent as `metadata[<key>]`.
    pub fn metadata(key: &str) -> String {
        format!("metadata[{key}]")
    }
}

/// Response of the start-session call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub uuid: String,
    /// Pre-signed destination URLs, one per part, in part order.
    pub parts: Vec<String>,
}

/// Response of the direct-upload call: a mapping from the uploaded filename to its identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectUploadResponse(pub HashMap<String, String>);

impl DirectUploadResponse {
    /// Looks up the identifier assigned to `filename`. Only an exact key match counts.
    pub fn identifier_for(&self, filename: &str) -> Option<&str> {
        self.0.get(filename).map(String::as_str)
    }
}

/// The description of a file shared by the start-session and direct-upload requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadParams {
    pub public_key: String,
    pub store: String,
    /// The synthesized remote filename, `{sessionId}.{ext}`.
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    /// Sorted so the encoded form is deterministic.
    pub metadata: BTreeMap<String, String>,
}

impl UploadParams {
    /// The text fields of a start-session (`part_size` set) or direct-upload request, in wire order.
    pub fn form_fields(&self, part_size: Option<u64>) -> Vec<(String, String)> {
        let mut out = vec![
            (fields::PUBLIC_KEY.to_owned(), self.public_key.clone()),
            (fields::STORE.to_owned(), self.store.clone()),
            (fields::FILENAME.to_owned(), self.filename.clone()),
            (fields::SIZE.to_owned(), self.size.to_string()),
            (fields::CONTENT_TYPE.to_owned(), self.mime_type.clone()),
        ];
        if let Some(part_size) = part_size {
            out.push((fields::PART_SIZE.to_owned(), part_size.to_string()));
        }
        out.extend(self.metadata.iter().map(|(k, v)| (fields::metadata(k), v.clone())));
        out
    }
}
