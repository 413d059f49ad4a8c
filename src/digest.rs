use sha1::{Digest, Sha1};
use url::Url;
use uuid::Uuid;

use crate::bundle::WORKFLOW_ROOT;

pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

pub fn utf8_sha1(text: &str) -> String {
    sha1_hex(text.as_bytes())
}

/// RFC 4122 version 5 UUID of `uri` in the URL namespace.
pub fn namespace_uuid(uri: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, uri.as_bytes())
}

/// Stable identifier of a workflow: the UUID embedded in its identifier when it
/// lives under the workflow root, otherwise a name-based UUID of the identifier.
pub fn workflow_uuid(identifier: &Url) -> Uuid {
    identifier
        .as_str()
        .strip_prefix(WORKFLOW_ROOT)
        .map(|rest| rest.replace('/', ""))
        .and_then(|id| Uuid::parse_str(&id).ok())
        .unwrap_or_else(|| namespace_uuid(identifier.as_str()))
}
