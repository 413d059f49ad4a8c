use std::collections::BTreeSet;
use std::fmt;
use std::io::{Cursor, Read};

use url::Url;

use crate::error::Wf2RoError;

/// A research object as seen during one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchObject {
    pub uri: Url,
    pub aggregated: BTreeSet<Url>,
}

impl ResearchObject {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            aggregated: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, resource: &Url) {
        self.aggregated.insert(resource.clone());
    }

    pub fn contains(&self, uri: &Url) -> bool {
        uri.as_str().starts_with(self.uri.as_str())
    }

    /// Path of `uri` relative to the RO when it lies inside it.
    pub fn relative_path(&self, uri: &Url) -> Option<String> {
        uri.as_str()
            .strip_prefix(self.uri.as_str())
            .map(ToOwned::to_owned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub uri: Url,
    pub entries: Vec<FolderEntry>,
}

impl Folder {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            entries: Vec::new(),
        }
    }

    pub fn entry_containing(&self, fragment: &str) -> Option<&FolderEntry> {
        if fragment.is_empty() {
            return None;
        }
        self.entries.iter().find(|entry| entry.name.contains(fragment))
    }

    pub fn entry_named(&self, name: &str) -> Option<&FolderEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub uri: Option<Url>,
    pub resource: Url,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub uri: Url,
    pub body: Url,
    pub targets: Vec<Url>,
}

/// Bytes to upload together with their content type. Either fully buffered or
/// streamed from a reader such as a pipe.
pub struct Payload {
    reader: Box<dyn Read + Send>,
    content_type: String,
}

impl Payload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self {
            reader: Box::new(Cursor::new(bytes.into())),
            content_type: content_type.to_string(),
        }
    }

    pub fn from_reader(reader: impl Read + Send + 'static, content_type: &str) -> Self {
        Self {
            reader: Box::new(reader),
            content_type: content_type.to_string(),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, Wf2RoError> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Narrow view of the remote research object store.
pub trait UploadGateway: Send + Sync {
    /// `Ok(None)` when no RO exists at `uri`.
    fn get_research_object(&self, uri: &Url) -> Result<Option<ResearchObject>, Wf2RoError>;

    fn create_research_object(&self, uri: &Url, slug: &str) -> Result<ResearchObject, Wf2RoError>;

    /// Uploads and aggregates a resource; returns the resource URI.
    fn upload_resource(
        &self,
        ro: &ResearchObject,
        slug: &str,
        payload: Payload,
    ) -> Result<Url, Wf2RoError>;

    fn annotate(
        &self,
        ro: &ResearchObject,
        name: &str,
        targets: &[Url],
        payload: Payload,
    ) -> Result<Annotation, Wf2RoError>;

    /// Creates the folder at `path` or returns the existing one with its entries.
    fn create_folder(&self, ro: &ResearchObject, path: &str) -> Result<Folder, Wf2RoError>;

    fn load_folder(&self, folder: &Url) -> Result<Folder, Wf2RoError>;

    fn add_folder_entry(
        &self,
        folder: &Url,
        resource: &Url,
        name: &str,
    ) -> Result<FolderEntry, Wf2RoError>;

    /// Aggregates a URI that stays outside the store. No conversion step
    /// needs it; it completes the storage protocol for other callers.
    fn aggregate_external(&self, ro: &ResearchObject, uri: &Url) -> Result<Url, Wf2RoError>;
}
