use std::fs;
use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use url::Url;

use crate::bundle::WorkflowBundle;
use crate::error::Wf2RoError;

pub const BUNDLE_MEDIA_TYPE: &str = "application/vnd.wf2ro.bundle+json";
const JSON_MEDIA_TYPE: &str = "application/json";

pub trait BundleReader: Send + Sync {
    fn read_bundle(&self, source: &Url, format: &str) -> Result<WorkflowBundle, Wf2RoError>;
}

pub fn is_supported_format(format: &str) -> bool {
    let essence = format.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(BUNDLE_MEDIA_TYPE) || essence.eq_ignore_ascii_case(JSON_MEDIA_TYPE)
}

pub fn parse_bundle(bytes: &[u8], format: &str) -> Result<WorkflowBundle, Wf2RoError> {
    if !is_supported_format(format) {
        return Err(Wf2RoError::UnsupportedFormat(format.to_string()));
    }
    let bundle: WorkflowBundle =
        serde_json::from_slice(bytes).map_err(|err| Wf2RoError::BundleParse(err.to_string()))?;
    bundle.validate()?;
    Ok(bundle)
}

/// Serializes the bundle, with its current main workflow designation, in the
/// native bundle media type.
pub fn write_bundle(bundle: &WorkflowBundle, out: &mut dyn Write) -> Result<(), Wf2RoError> {
    serde_json::to_writer_pretty(&mut *out, bundle)
        .map_err(|err| Wf2RoError::Serialization(err.to_string()))?;
    out.flush()?;
    Ok(())
}

#[derive(Clone)]
pub struct HttpBundleReader {
    client: Client,
}

impl HttpBundleReader {
    pub fn new(timeout: Duration) -> Result<Self, Wf2RoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("wf2ro/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| Wf2RoError::BundleFetch {
                    uri: String::new(),
                    message: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| Wf2RoError::BundleFetch {
                uri: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn fetch(&self, source: &Url, format: &str) -> Result<Vec<u8>, Wf2RoError> {
        let fetch_error = |message: String| Wf2RoError::BundleFetch {
            uri: source.to_string(),
            message,
        };

        match source.scheme() {
            "file" => {
                let path = source
                    .to_file_path()
                    .map_err(|_| fetch_error("not a local path".to_string()))?;
                let path = Utf8PathBuf::from_path_buf(path)
                    .map_err(|path| fetch_error(format!("non UTF-8 path {}", path.display())))?;
                fs::read(&path).map_err(|err| fetch_error(format!("{path}: {err}")))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(source.clone())
                    .header(ACCEPT, format)
                    .send()
                    .map_err(|err| fetch_error(err.to_string()))?;
                if !response.status().is_success() {
                    return Err(fetch_error(format!("status {}", response.status().as_u16())));
                }
                response
                    .bytes()
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| fetch_error(err.to_string()))
            }
            other => Err(fetch_error(format!("unsupported scheme {other}"))),
        }
    }
}

impl BundleReader for HttpBundleReader {
    fn read_bundle(&self, source: &Url, format: &str) -> Result<WorkflowBundle, Wf2RoError> {
        if !is_supported_format(format) {
            return Err(Wf2RoError::UnsupportedFormat(format.to_string()));
        }
        let bytes = self.fetch(source, format)?;
        parse_bundle(&bytes, format)
    }
}
