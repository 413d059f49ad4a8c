use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::Router;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, LINK, LOCATION};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use url::Url;

use wf2ro::error::Wf2RoError;
use wf2ro::gateway::{Payload, ResearchObject, UploadGateway};
use wf2ro::rosrs::RosrsClient;

const PROXY_FOR: &str = "http://www.openarchives.org/ore/terms/proxyFor";
const ENTRY_NAME: &str = "http://purl.org/wf4ever/ro#entryName";

/// In-memory stand-in for a RODL research object at `/ROs/ro1/`.
#[derive(Default)]
struct Rodl {
    state: Mutex<RodlState>,
}

#[derive(Default)]
struct RodlState {
    folders: BTreeMap<String, Vec<(String, String)>>,
    folder_posts: usize,
    proxies: usize,
    external: Vec<String>,
    authorization: Option<String>,
}

impl Rodl {
    fn state(&self) -> std::sync::MutexGuard<'_, RodlState> {
        self.state.lock().unwrap()
    }
}

async fn rodl(
    State(rodl): State<Arc<Rodl>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let here = format!("http://{}{}", header(HOST), uri.path());
    let ro = format!("http://{}/ROs/ro1/", header(HOST));
    let mut state = rodl.state();
    state.authorization = Some(header(AUTHORIZATION));

    if method == Method::GET {
        if here == format!("{ro}.ro/manifest.rdf") {
            let manifest = format!(
                "<{ro}> <http://www.openarchives.org/ore/terms/aggregates> <{ro}wf.wfbundle> .\n\
                 <{ro}> <http://purl.org/dc/terms/creator> _:b0 .\n\
                 _:b0 <http://xmlns.com/foaf/0.1/name> \"Alice\" .\n\
                 <{ro}> <http://www.openarchives.org/ore/terms/aggregates> <{ro}caf%C3%A9.txt> .\n"
            );
            return (StatusCode::OK, manifest).into_response();
        }
        return match state.folders.get(&here) {
            Some(entries) => {
                let mut text = format!(
                    "<{here}> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://purl.org/wf4ever/ro#Folder> .\n\
                     <{here}> <http://purl.org/dc/terms/creator> _:owner .\n"
                );
                for (idx, (resource, name)) in entries.iter().enumerate() {
                    let entry = format!("{here}entries/{idx}");
                    text.push_str(&format!("<{entry}> <{PROXY_FOR}> <{resource}> .\n"));
                    text.push_str(&format!("<{entry}> <{ENTRY_NAME}> \"{name}\" .\n"));
                }
                (StatusCode::OK, text).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let content_type = header(CONTENT_TYPE);
    let slug = header(HeaderName::from_static("slug"));
    if here == ro && content_type == "application/vnd.wf4ever.folder" {
        state.folder_posts += 1;
        if slug == "broken/" {
            return StatusCode::CREATED.into_response();
        }
        let folder = format!("{ro}{slug}");
        if state.folders.contains_key(&folder) {
            return StatusCode::CONFLICT.into_response();
        }
        state.folders.insert(folder.clone(), Vec::new());
        return (StatusCode::CREATED, [(LOCATION, folder)]).into_response();
    }
    if here == ro && content_type == "application/vnd.wf4ever.proxy" {
        let target = Regex::new(r"ore:proxyFor <([^>]+)>").unwrap();
        let external = target.captures(&body).unwrap()[1].to_string();
        state.external.push(external);
        state.proxies += 1;
        let proxy = format!("{ro}.ro/proxies/{}", state.proxies);
        return (StatusCode::CREATED, [(LOCATION, proxy)]).into_response();
    }
    if here == ro {
        let resource = format!("{ro}{slug}");
        if slug.ends_with(".txt") {
            return (StatusCode::CREATED, [(LOCATION, resource)]).into_response();
        }
        state.proxies += 1;
        let proxy = format!("{ro}.ro/proxies/{}", state.proxies);
        let link = format!("<{resource}>; rel=\"{PROXY_FOR}\"");
        return (StatusCode::CREATED, [(LINK, link), (LOCATION, proxy)]).into_response();
    }
    if content_type == "application/vnd.wf4ever.folderentry" {
        let Some(entries) = state.folders.get_mut(&here) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let resource = Regex::new(r"ore:proxyFor <([^>]+)>").unwrap();
        let name = Regex::new(r#"ro:entryName "([^"]*)""#).unwrap();
        entries.push((
            resource.captures(&body).unwrap()[1].to_string(),
            name.captures(&body).unwrap()[1].to_string(),
        ));
        let entry = format!("{here}entries/{}", entries.len() - 1);
        return (StatusCode::CREATED, [(LOCATION, entry)]).into_response();
    }
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

/// Serves the stub on an ephemeral port from its own runtime thread.
fn serve() -> (ResearchObject, Arc<Rodl>) {
    let stub = Arc::new(Rodl::default());
    let app = Router::new().fallback(rodl).with_state(Arc::clone(&stub));
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    let addr = rx.recv().unwrap();
    let ro = Url::parse(&format!("http://{addr}/ROs/ro1/")).unwrap();
    (ResearchObject::new(ro), stub)
}

fn client() -> RosrsClient {
    RosrsClient::new("secret", Duration::from_secs(5)).unwrap()
}

#[test]
fn folder_creation_is_idempotent() {
    let (ro, rodl) = serve();
    let client = client();

    let first = client.create_folder(&ro, "nested/").unwrap();
    assert_eq!(first.uri, ro.uri.join("nested/").unwrap());
    assert!(first.entries.is_empty());

    let resource = ro.uri.join("nested/A.wfbundle").unwrap();
    let entry = client
        .add_folder_entry(&first.uri, &resource, "A-1234.wfbundle")
        .unwrap();
    assert_eq!(entry.uri, Some(first.uri.join("entries/0").unwrap()));

    let second = client.create_folder(&ro, "nested/").unwrap();
    assert_eq!(second.uri, first.uri);
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.entries[0].resource, resource);
    assert!(second.entry_containing("1234").is_some());

    let state = rodl.state();
    assert_eq!(state.folder_posts, 2);
    assert_eq!(state.folders.len(), 1);
    assert_eq!(state.authorization.as_deref(), Some("Bearer secret"));
}

#[test]
fn folder_created_without_location_is_inconsistent() {
    let (ro, _) = serve();
    assert_matches!(
        client().create_folder(&ro, "broken/"),
        Err(Wf2RoError::ManifestInconsistency(message)) if message.contains("Location")
    );
}

#[test]
fn upload_prefers_proxied_resource_over_location() {
    let (ro, _) = serve();
    let client = client();

    let bundle = client
        .upload_resource(&ro, "wf.wfbundle", Payload::from_bytes("{}", "application/json"))
        .unwrap();
    assert_eq!(bundle, ro.uri.join("wf.wfbundle").unwrap());

    let script = client
        .upload_resource(&ro, "script.txt", Payload::from_bytes("print(1)", "text/plain"))
        .unwrap();
    assert_eq!(script, ro.uri.join("script.txt").unwrap());
}

#[test]
fn manifest_with_blank_nodes_is_read() {
    let (ro, _) = serve();
    let loaded = client().get_research_object(&ro.uri).unwrap().unwrap();
    assert_eq!(loaded.aggregated.len(), 2);
    assert!(loaded.aggregated.contains(&ro.uri.join("wf.wfbundle").unwrap()));

    let missing = ro.uri.join("../ro2/").unwrap();
    assert!(client().get_research_object(&missing).unwrap().is_none());
}

#[test]
fn external_uri_is_aggregated_by_proxy() {
    let (ro, rodl) = serve();
    let external = Url::parse("http://example.com/elsewhere.txt").unwrap();

    let aggregated = client().aggregate_external(&ro, &external).unwrap();
    assert_eq!(aggregated, external);
    assert_eq!(rodl.state().external, [external.to_string()]);
}
