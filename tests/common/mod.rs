#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use url::Url;

use wf2ro::backend::Backend;
use wf2ro::bundle::{
    AnnotationTarget, BundleAnnotation, BundleResource, Configuration, Processor, Profile,
    Workflow, WorkflowBundle,
};
use wf2ro::bundle_io::BundleReader;
use wf2ro::error::Wf2RoError;
use wf2ro::gateway::{Annotation, Folder, FolderEntry, Payload, ResearchObject, UploadGateway};
use wf2ro::rdf::{Graph, Term, vocab};

pub const RO_URI: &str = "http://example.com/ROs/ro1/";
pub const SOURCE_URI: &str = "http://example.com/workflows/hello.wfbundle";
pub const BUNDLE_BASE: &str = "http://ns.taverna.org.uk/2010/workflowBundle/8781d5f4-d0ba-48a8-a1d1-14281bd8a917/";
pub const MAIN_ID: &str = "http://ns.taverna.org.uk/2010/workflow/00626652-55ae-4a9e-80d4-c8e9ac84e2ca/";
pub const INNER_ID: &str = "http://ns.taverna.org.uk/2010/workflow/1f0dc2b1-bd93-4c36-8eb7-4b0a3e5eb43c/";
pub const OTHER_ID: &str = "http://example.com/workflows/other/";

pub fn url(value: &str) -> Url {
    Url::parse(value).unwrap()
}

fn workflow(name: &str, identifier: &str) -> Workflow {
    Workflow {
        name: name.to_string(),
        identifier: url(identifier),
        inputs: Vec::new(),
        outputs: Vec::new(),
        processors: Vec::new(),
        links: Vec::new(),
        revisions: Vec::new(),
    }
}

/// Main workflow `Hello` with three annotations on it and one on a
/// processor, no nested workflows and no scripts.
pub fn sample_bundle() -> WorkflowBundle {
    let mut main = workflow("Hello", MAIN_ID);
    main.inputs.push("name".to_string());
    main.outputs.push("greeting".to_string());
    main.processors.push(Processor {
        name: "concat".to_string(),
        nested_workflow: None,
    });

    let mut resources = BTreeMap::new();
    resources.insert(
        "annotation/a1.ttl".to_string(),
        BundleResource {
            media_type: "text/turtle".to_string(),
            content: "<> <http://purl.org/dc/terms/title> \"Hello\" .".to_string(),
        },
    );
    resources.insert(
        "annotation/a2.ttl".to_string(),
        BundleResource {
            media_type: "text/turtle".to_string(),
            content: "@base <http://example.com/> .\n<> <http://purl.org/dc/terms/creator> \"Stian\" ."
                .to_string(),
        },
    );
    resources.insert(
        "annotation/a3.txt".to_string(),
        BundleResource {
            media_type: "text/plain".to_string(),
            content: "Says hello.".to_string(),
        },
    );
    resources.insert(
        "annotation/a4.ttl".to_string(),
        BundleResource {
            media_type: "text/turtle".to_string(),
            content: "<> <http://purl.org/dc/terms/description> \"concat\" .".to_string(),
        },
    );

    WorkflowBundle {
        name: "hello".to_string(),
        base_uri: url(BUNDLE_BASE),
        main_workflow: "Hello".to_string(),
        workflows: vec![main],
        annotations: vec![
            BundleAnnotation {
                target: AnnotationTarget::Bundle,
                body: "annotation/a1.ttl".to_string(),
            },
            BundleAnnotation {
                target: AnnotationTarget::Workflow("Hello".to_string()),
                body: format!("{BUNDLE_BASE}annotation/a2.ttl"),
            },
            BundleAnnotation {
                target: AnnotationTarget::Workflow("Hello".to_string()),
                body: "annotation/a3.txt".to_string(),
            },
            BundleAnnotation {
                target: AnnotationTarget::Other("workflow/Hello/processor/concat/".to_string()),
                body: "annotation/a4.ttl".to_string(),
            },
        ],
        profiles: Vec::new(),
        resources,
    }
}

/// Sample bundle plus two nested workflows and a profile whose configurations
/// carry the same script twice under different names.
pub fn rich_bundle() -> WorkflowBundle {
    let mut bundle = sample_bundle();
    bundle.workflows[0].processors.push(Processor {
        name: "inner".to_string(),
        nested_workflow: Some("Inner".to_string()),
    });
    bundle.workflows.push(workflow("Inner", INNER_ID));
    bundle.workflows.push(workflow("Other", OTHER_ID));

    let script = |name: &str, text: &str| Configuration {
        name: name.to_string(),
        json: json!({ "script": text }),
    };
    bundle.profiles.push(Profile {
        name: "taverna".to_string(),
        configurations: vec![
            script("concat", "output = string1 + string2"),
            script("join", "output = string1 + string2"),
            script("upper", "output = input.toUpperCase()"),
            Configuration {
                name: "rest".to_string(),
                json: json!({ "url": "http://example.com/" }),
            },
            script("blank", ""),
        ],
    });
    bundle
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub slug: String,
    pub content_type: String,
    pub uri: Url,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RecordedAnnotation {
    pub name: String,
    pub targets: Vec<Url>,
    pub body: Url,
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct GatewayState {
    pub ro_exists: bool,
    pub created_slug: Option<String>,
    pub aggregated: Vec<(Url, &'static str)>,
    pub uploads: Vec<Upload>,
    pub annotations: Vec<RecordedAnnotation>,
    pub folders: BTreeMap<Url, Folder>,
    pub folder_requests: usize,
    pub fail_on: BTreeSet<String>,
    counter: usize,
}

/// Holds uploads until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// In-memory research object store.
#[derive(Debug, Clone)]
pub struct MockGateway {
    pub ro: Url,
    pub state: Arc<Mutex<GatewayState>>,
    gate: Option<Arc<Gate>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            ro: url(RO_URI),
            state: Arc::new(Mutex::new(GatewayState::default())),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn failing(operations: &[&str]) -> Self {
        let gateway = Self::new();
        gateway.state().fail_on = operations.iter().map(|op| op.to_string()).collect();
        gateway
    }

    pub fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    fn check(&self, operation: &str) -> Result<(), Wf2RoError> {
        if self.state().fail_on.contains(operation) {
            return Err(Wf2RoError::RemoteStatus {
                status: 500,
                message: format!("{operation} refused"),
            });
        }
        Ok(())
    }

    /// The RO's aggregation as a graph: `ore:aggregates` plus one type per resource.
    pub fn aggregation_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for (resource, class) in &self.state().aggregated {
            graph.add(self.ro.as_str(), vocab::AGGREGATES, Term::iri(resource.as_str()));
            graph.add(resource.as_str(), vocab::TYPE, Term::iri(*class));
        }
        graph
    }

    pub fn uploads_under(&self, prefix: &str) -> Vec<Upload> {
        self.state()
            .uploads
            .iter()
            .filter(|upload| upload.slug.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn folder(&self, uri: &str) -> Option<Folder> {
        self.state().folders.get(&url(uri)).cloned()
    }
}

impl UploadGateway for MockGateway {
    fn get_research_object(&self, uri: &Url) -> Result<Option<ResearchObject>, Wf2RoError> {
        self.check("get_research_object")?;
        let state = self.state();
        if !state.ro_exists {
            return Ok(None);
        }
        let mut ro = ResearchObject::new(uri.clone());
        for (resource, _) in &state.aggregated {
            ro.record(resource);
        }
        Ok(Some(ro))
    }

    fn create_research_object(&self, uri: &Url, slug: &str) -> Result<ResearchObject, Wf2RoError> {
        self.check("create_research_object")?;
        let mut state = self.state();
        state.ro_exists = true;
        state.created_slug = Some(slug.to_string());
        Ok(ResearchObject::new(uri.clone()))
    }

    fn upload_resource(
        &self,
        ro: &ResearchObject,
        slug: &str,
        payload: Payload,
    ) -> Result<Url, Wf2RoError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.check(&format!("upload:{slug}"))?;
        let content_type = payload.content_type().to_string();
        let content = payload.into_bytes()?;
        let uri = ro.uri.join(slug).unwrap();
        let mut state = self.state();
        state.aggregated.push((uri.clone(), vocab::RO_RESOURCE));
        state.uploads.push(Upload {
            slug: slug.to_string(),
            content_type,
            uri: uri.clone(),
            content,
        });
        Ok(uri)
    }

    fn annotate(
        &self,
        ro: &ResearchObject,
        name: &str,
        targets: &[Url],
        payload: Payload,
    ) -> Result<Annotation, Wf2RoError> {
        self.check(&format!("annotate:{name}"))?;
        let content_type = payload.content_type().to_string();
        let content = String::from_utf8(payload.into_bytes()?).unwrap();
        let mut state = self.state();
        state.counter += 1;
        let body = ro.uri.join(&format!("body-{name}-{}", state.counter)).unwrap();
        let uri = ro.uri.join(&format!(".ro/annotation-{}", state.counter)).unwrap();
        state.aggregated.push((uri.clone(), vocab::RO_AGGREGATED_ANNOTATION));
        state.annotations.push(RecordedAnnotation {
            name: name.to_string(),
            targets: targets.to_vec(),
            body: body.clone(),
            content_type,
            content,
        });
        Ok(Annotation {
            uri,
            body,
            targets: targets.to_vec(),
        })
    }

    fn create_folder(&self, ro: &ResearchObject, path: &str) -> Result<Folder, Wf2RoError> {
        self.check("create_folder")?;
        let uri = ro.uri.join(path).unwrap();
        let mut state = self.state();
        state.folder_requests += 1;
        Ok(state
            .folders
            .entry(uri.clone())
            .or_insert_with(|| Folder::new(uri))
            .clone())
    }

    fn load_folder(&self, folder: &Url) -> Result<Folder, Wf2RoError> {
        self.check("load_folder")?;
        self.state()
            .folders
            .get(folder)
            .cloned()
            .ok_or_else(|| Wf2RoError::RemoteStatus {
                status: 404,
                message: format!("{folder} not found"),
            })
    }

    fn add_folder_entry(
        &self,
        folder: &Url,
        resource: &Url,
        name: &str,
    ) -> Result<FolderEntry, Wf2RoError> {
        self.check("add_folder_entry")?;
        let mut state = self.state();
        let stored = state
            .folders
            .get_mut(folder)
            .ok_or_else(|| Wf2RoError::ManifestInconsistency(format!("no folder {folder}")))?;
        let entry = FolderEntry {
            uri: Some(folder.join(&format!("entry-{}", stored.entries.len() + 1)).unwrap()),
            resource: resource.clone(),
            name: name.to_string(),
        };
        stored.entries.push(entry.clone());
        Ok(entry)
    }

    fn aggregate_external(&self, _ro: &ResearchObject, uri: &Url) -> Result<Url, Wf2RoError> {
        self.check("aggregate_external")?;
        self.state().aggregated.push((uri.clone(), vocab::RO_RESOURCE));
        Ok(uri.clone())
    }
}

struct MockReader {
    bundle: Option<WorkflowBundle>,
    reads: Arc<AtomicUsize>,
}

impl BundleReader for MockReader {
    fn read_bundle(&self, source: &Url, _format: &str) -> Result<WorkflowBundle, Wf2RoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.bundle.clone().ok_or_else(|| Wf2RoError::BundleFetch {
            uri: source.to_string(),
            message: "status 404".to_string(),
        })
    }
}

/// Hands out a fixed bundle (or a fetch failure) and the shared mock gateway.
#[derive(Clone)]
pub struct MockBackend {
    pub gateway: MockGateway,
    pub bundle: Option<WorkflowBundle>,
    pub reads: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(gateway: MockGateway) -> Self {
        Self {
            gateway,
            bundle: Some(sample_bundle()),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unreadable(gateway: MockGateway) -> Self {
        Self {
            bundle: None,
            ..Self::new(gateway)
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Backend for MockBackend {
    fn bundle_reader(&self) -> Result<Box<dyn BundleReader>, Wf2RoError> {
        Ok(Box::new(MockReader {
            bundle: self.bundle.clone(),
            reads: Arc::clone(&self.reads),
        }))
    }

    fn gateway(&self, _token: &str) -> Result<Box<dyn UploadGateway>, Wf2RoError> {
        Ok(Box::new(self.gateway.clone()))
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn expected_added() -> Vec<Url> {
    [
        "Hello.wfbundle",
        "body-wf-1",
        "body-wf-2",
        "body-wf-3",
        "body-wfdesc-4",
        "body-roevo-5",
        "body-link-6",
    ]
    .iter()
    .map(|path| url(RO_URI).join(path).unwrap())
    .collect()
}
