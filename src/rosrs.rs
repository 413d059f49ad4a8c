use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, LINK, LOCATION, USER_AGENT,
};
use tracing::debug;
use url::Url;

use crate::error::Wf2RoError;
use crate::gateway::{Annotation, Folder, FolderEntry, Payload, ResearchObject, UploadGateway};
use crate::rdf::{Graph, Term, vocab};

const FOLDER_MEDIA_TYPE: &str = "application/vnd.wf4ever.folder";
const FOLDER_ENTRY_MEDIA_TYPE: &str = "application/vnd.wf4ever.folderentry";
const PROXY_MEDIA_TYPE: &str = "application/vnd.wf4ever.proxy";
const ANNOTATION_MEDIA_TYPE: &str = "application/vnd.wf4ever.annotation";
const NTRIPLES_MEDIA_TYPE: &str = "application/n-triples";
const MANIFEST_PATH: &str = ".ro/manifest.rdf";

/// [`UploadGateway`] speaking the RODL research object storage protocol.
#[derive(Clone)]
pub struct RosrsClient {
    client: Client,
}

impl RosrsClient {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, Wf2RoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("wf2ro/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| Wf2RoError::RemoteHttp(err.to_string()))?,
        );
        if !token.trim().is_empty() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|err| Wf2RoError::RemoteHttp(format!("invalid access token: {err}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| Wf2RoError::RemoteHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn send(request: RequestBuilder) -> Result<Response, Wf2RoError> {
        request
            .send()
            .map_err(|err| Wf2RoError::RemoteHttp(err.to_string()))
    }

    fn handle_status(response: Response, expected: &[StatusCode]) -> Result<Response, Wf2RoError> {
        if expected.contains(&response.status()) {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "RODL request failed".to_string());
        Err(Wf2RoError::RemoteStatus { status, message })
    }

    fn fetch_graph(&self, uri: &Url) -> Result<Option<Graph>, Wf2RoError> {
        let response = Self::send(
            self.client
                .get(uri.clone())
                .header(ACCEPT, NTRIPLES_MEDIA_TYPE),
        )?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::handle_status(response, &[StatusCode::OK])?;
        let text = response
            .text()
            .map_err(|err| Wf2RoError::RemoteHttp(err.to_string()))?;
        Graph::parse_ntriples(&text).map(Some)
    }

    fn created_location(response: &Response, what: &str) -> Result<Url, Wf2RoError> {
        header_url(response.headers(), LOCATION.as_str()).ok_or_else(|| {
            Wf2RoError::ManifestInconsistency(format!("{what} response has no Location"))
        })
    }
}

impl UploadGateway for RosrsClient {
    fn get_research_object(&self, uri: &Url) -> Result<Option<ResearchObject>, Wf2RoError> {
        let manifest = uri
            .join(MANIFEST_PATH)
            .map_err(|err| Wf2RoError::invalid_destination(uri.as_str(), err))?;
        let Some(graph) = self.fetch_graph(&manifest)? else {
            return Ok(None);
        };
        let mut ro = ResearchObject::new(uri.clone());
        for object in graph.objects(uri.as_str(), vocab::AGGREGATES) {
            if let Some(resource) = object.as_iri().and_then(|iri| Url::parse(iri).ok()) {
                ro.record(&resource);
            }
        }
        Ok(Some(ro))
    }

    fn create_research_object(&self, uri: &Url, slug: &str) -> Result<ResearchObject, Wf2RoError> {
        let service = uri
            .join("../")
            .map_err(|err| Wf2RoError::invalid_destination(uri.as_str(), err))?;
        debug!(service = %service, slug, "creating research object");
        let response = Self::send(
            self.client
                .post(service)
                .header("Slug", slug)
                .header(ACCEPT, "text/turtle"),
        )?;
        let response = Self::handle_status(response, &[StatusCode::CREATED])?;
        let location = Self::created_location(&response, "research object creation")?;
        Ok(ResearchObject::new(location))
    }

    fn upload_resource(
        &self,
        ro: &ResearchObject,
        slug: &str,
        payload: Payload,
    ) -> Result<Url, Wf2RoError> {
        let content_type = payload.content_type().to_string();
        let response = Self::send(
            self.client
                .post(ro.uri.clone())
                .header("Slug", slug)
                .header(CONTENT_TYPE, content_type)
                .body(Body::new(payload.into_reader())),
        )?;
        let response = Self::handle_status(response, &[StatusCode::CREATED, StatusCode::OK])?;
        if let Some(resource) = link_target(response.headers(), vocab::PROXY_FOR) {
            return Ok(resource);
        }
        Self::created_location(&response, "resource upload")
    }

    fn annotate(
        &self,
        ro: &ResearchObject,
        name: &str,
        targets: &[Url],
        payload: Payload,
    ) -> Result<Annotation, Wf2RoError> {
        let slug = format!(".ro/{name}-{}", uuid::Uuid::new_v4());
        let body = self.upload_resource(ro, &slug, payload)?;

        let mut request = self
            .client
            .post(ro.uri.clone())
            .header(CONTENT_TYPE, ANNOTATION_MEDIA_TYPE)
            .header(LINK, format!("<{body}>; rel=\"{}\"", vocab::AO_BODY));
        for target in targets {
            request = request.header(
                LINK,
                format!("<{target}>; rel=\"{}\"", vocab::ANNOTATES_RESOURCE),
            );
        }
        let response = Self::handle_status(Self::send(request)?, &[StatusCode::CREATED])?;
        let uri = Self::created_location(&response, "annotation")?;
        Ok(Annotation {
            uri,
            body,
            targets: targets.to_vec(),
        })
    }

    fn create_folder(&self, ro: &ResearchObject, path: &str) -> Result<Folder, Wf2RoError> {
        let folder_uri = ro
            .uri
            .join(path)
            .map_err(|err| Wf2RoError::invalid_destination(path, err))?;
        let mut description = Graph::new();
        description.add("", vocab::TYPE, Term::iri(vocab::RO_FOLDER));

        let response = Self::send(
            self.client
                .post(ro.uri.clone())
                .header("Slug", path)
                .header(CONTENT_TYPE, FOLDER_MEDIA_TYPE)
                .body(description.to_turtle()),
        )?;
        if response.status() == StatusCode::CONFLICT {
            debug!(folder = %folder_uri, "folder exists, loading it");
            return self.load_folder(&folder_uri);
        }
        let response = Self::handle_status(response, &[StatusCode::CREATED])?;
        let location = link_target(response.headers(), vocab::PROXY_FOR)
            .map(Ok)
            .unwrap_or_else(|| Self::created_location(&response, "folder creation"))?;
        Ok(Folder::new(location))
    }

    fn load_folder(&self, folder: &Url) -> Result<Folder, Wf2RoError> {
        let graph = self.fetch_graph(folder)?.ok_or_else(|| Wf2RoError::RemoteStatus {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("folder {folder} not found"),
        })?;
        Ok(folder_from_graph(folder, &graph))
    }

    fn add_folder_entry(
        &self,
        folder: &Url,
        resource: &Url,
        name: &str,
    ) -> Result<FolderEntry, Wf2RoError> {
        let mut description = Graph::new();
        description.add("", vocab::TYPE, Term::iri(vocab::RO_FOLDER_ENTRY));
        description.add("", vocab::PROXY_FOR, Term::iri(resource.as_str()));
        description.add("", vocab::ENTRY_NAME, Term::literal(name));

        let response = Self::send(
            self.client
                .post(folder.clone())
                .header(CONTENT_TYPE, FOLDER_ENTRY_MEDIA_TYPE)
                .body(description.to_turtle()),
        )?;
        let response = Self::handle_status(response, &[StatusCode::CREATED])?;
        Ok(FolderEntry {
            uri: header_url(response.headers(), LOCATION.as_str()),
            resource: resource.clone(),
            name: name.to_string(),
        })
    }

    fn aggregate_external(&self, ro: &ResearchObject, uri: &Url) -> Result<Url, Wf2RoError> {
        let mut description = Graph::new();
        description.add("", vocab::PROXY_FOR, Term::iri(uri.as_str()));
        let response = Self::send(
            self.client
                .post(ro.uri.clone())
                .header(CONTENT_TYPE, PROXY_MEDIA_TYPE)
                .body(description.to_turtle()),
        )?;
        Self::handle_status(response, &[StatusCode::CREATED])?;
        Ok(uri.clone())
    }
}

/// Entries are the subjects carrying both `ore:proxyFor` and `ro:entryName`.
pub fn folder_from_graph(folder: &Url, graph: &Graph) -> Folder {
    let mut result = Folder::new(folder.clone());
    let mut subjects: Vec<&str> = graph.subjects_with(vocab::ENTRY_NAME).collect();
    subjects.dedup();
    for subject in subjects {
        let resource = graph
            .objects(subject, vocab::PROXY_FOR)
            .find_map(|term| term.as_iri().and_then(|iri| Url::parse(iri).ok()));
        let name = graph
            .objects(subject, vocab::ENTRY_NAME)
            .find_map(Term::as_literal);
        if let (Some(resource), Some(name)) = (resource, name) {
            result.entries.push(FolderEntry {
                uri: Url::parse(subject).ok(),
                resource,
                name: name.to_string(),
            });
        }
    }
    result
}

fn header_url(headers: &HeaderMap, name: &str) -> Option<Url> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Url::parse(value.trim()).ok())
}

/// Finds `<uri>; rel="relation"` among the Link headers.
pub fn link_target(headers: &HeaderMap, relation: &str) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';').map(str::trim);
            let target = parts.next()?.strip_prefix('<')?.strip_suffix('>')?;
            let matches = parts.any(|param| {
                param
                    .strip_prefix("rel=")
                    .map(|rel| rel.trim_matches('"'))
                    .is_some_and(|rel| rel == relation)
            });
            if matches { Url::parse(target).ok() } else { None }
        })
}
