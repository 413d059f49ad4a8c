//! Conversion of one workflow bundle into a research object.
//!
//! Steps run strictly in order. Resolving the research object and uploading
//! the main bundle are fatal; every later step is attempted independently and
//! a failure there is logged and kept as a warning in the outcome.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::bundle::{BundleAnnotation, WorkflowBundle};
use crate::bundle_io::{BUNDLE_MEDIA_TYPE, write_bundle};
use crate::describe::{self, TURTLE_MEDIA_TYPE};
use crate::digest;
use crate::error::Wf2RoError;
use crate::gateway::{Folder, Payload, ResearchObject, UploadGateway};
use crate::naming::{NameAllocator, sanitize};
use crate::pipe::{self, PipeWriter};
use crate::rdf::link_graph;

const SCRIPT_MEDIA_TYPE: &str = "text/plain";
const BUNDLE_EXTENSION: &str = "wfbundle";

/// Folder per extraction category. An absent folder means the category is
/// not placed in a folder; nested workflows and scripts are only extracted
/// when their folder is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractFolders {
    pub main: Option<Url>,
    pub nested: Option<Url>,
    pub scripts: Option<Url>,
    pub services: Option<Url>,
}

/// Resources added so far, shared with whoever reports on the conversion.
#[derive(Debug, Clone, Default)]
pub struct AddedResources(Arc<Mutex<Vec<Url>>>);

impl AddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Url>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, uri: Url) {
        self.lock().push(uri);
    }

    pub fn snapshot(&self) -> Vec<Url> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub research_object: Url,
    pub added: Vec<Url>,
    pub warnings: Vec<String>,
}

pub struct Converter<'g> {
    gateway: &'g dyn UploadGateway,
    source: Url,
    destination: Url,
    folders: ExtractFolders,
    cancel: CancellationToken,
    added: AddedResources,
    pipe_capacity: usize,
    warnings: Vec<String>,
}

impl<'g> Converter<'g> {
    pub fn new(gateway: &'g dyn UploadGateway, source: Url, destination: Url) -> Self {
        Self {
            gateway,
            source,
            destination,
            folders: ExtractFolders::default(),
            cancel: CancellationToken::new(),
            added: AddedResources::new(),
            pipe_capacity: pipe::DEFAULT_CAPACITY,
            warnings: Vec::new(),
        }
    }

    pub fn with_folders(mut self, folders: ExtractFolders) -> Self {
        self.folders = folders;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports every added resource into `added` as soon as it is recorded.
    pub fn with_progress(mut self, added: AddedResources) -> Self {
        self.added = added;
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Runs the conversion. The bundle is borrowed mutably only so nested
    /// workflows can be serialized as main; its designation is restored
    /// before this returns.
    pub fn convert(mut self, bundle: &mut WorkflowBundle) -> Result<ConversionOutcome, Wf2RoError> {
        info!(source = %self.source, ro = %self.destination, "conversion started");
        self.check_cancelled()?;

        let mut ro = self.resolve_research_object()?;
        let mut names = NameAllocator::new(&ro.uri);
        names.reserve_existing(&ro.aggregated);

        self.check_cancelled()?;
        let main_resource = self.upload_main(&mut ro, &mut names, bundle)?;

        for annotation in &bundle.annotations {
            if !bundle.annotates_main(annotation) {
                debug!(body = %annotation.body, "annotation target not aggregated, skipping");
                continue;
            }
            self.check_cancelled()?;
            let result = self.copy_annotation(&mut ro, &main_resource, bundle, annotation);
            self.soft(&format!("annotation {}", annotation.body), result)?;
        }

        self.check_cancelled()?;
        let result = self.annotate_streamed(&mut ro, "wfdesc", &main_resource, TURTLE_MEDIA_TYPE, |out| {
            describe::write_workflow_description(bundle, out)
        });
        self.soft("workflow description", result)?;

        self.check_cancelled()?;
        let result = self.annotate_streamed(&mut ro, "roevo", &main_resource, TURTLE_MEDIA_TYPE, |out| {
            describe::write_workflow_history(bundle, out)
        });
        self.soft("workflow history", result)?;

        self.check_cancelled()?;
        let result = bundle
            .main()
            .and_then(|main| bundle.workflow_uri(main))
            .and_then(|workflow| self.link(&mut ro, &main_resource, Some(&workflow)));
        self.soft("provenance link", result)?;

        if let Some(folder_uri) = self.folders.nested.clone() {
            self.extract_nested_workflows(&mut ro, &mut names, bundle, &folder_uri)?;
        }
        if let Some(folder_uri) = self.folders.scripts.clone() {
            self.extract_scripts(&mut ro, &mut names, bundle, &folder_uri)?;
        }
        if let Some(folder_uri) = &self.folders.services {
            debug!(folder = %folder_uri, "services folder given, nothing to extract");
        }

        let added = self.added.snapshot();
        info!(
            ro = %ro.uri,
            added = added.len(),
            warnings = self.warnings.len(),
            "conversion finished"
        );
        Ok(ConversionOutcome {
            research_object: ro.uri,
            added,
            warnings: self.warnings,
        })
    }

    fn check_cancelled(&self) -> Result<(), Wf2RoError> {
        if self.cancel.is_cancelled() {
            Err(Wf2RoError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Absorbs a failed non-fatal step. Cancellation still aborts the run.
    fn soft<T>(&mut self, step: &str, result: Result<T, Wf2RoError>) -> Result<Option<T>, Wf2RoError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(Wf2RoError::Cancelled) => Err(Wf2RoError::Cancelled),
            Err(_) if self.cancel.is_cancelled() => Err(Wf2RoError::Cancelled),
            Err(err) => {
                warn!(step, error = %err, "conversion step failed, continuing");
                self.warnings.push(format!("{step}: {err}"));
                Ok(None)
            }
        }
    }

    fn record(&self, ro: &mut ResearchObject, resource: &Url) {
        debug!(resource = %resource, "resource added");
        ro.record(resource);
        self.added.push(resource.clone());
    }

    fn resolve_research_object(&self) -> Result<ResearchObject, Wf2RoError> {
        if let Some(ro) = self.gateway.get_research_object(&self.destination)? {
            debug!(ro = %ro.uri, aggregated = ro.aggregated.len(), "reusing research object");
            return Ok(ro);
        }
        let slug = self
            .destination
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("ro")
            .to_string();
        info!(ro = %self.destination, slug = %slug, "creating research object");
        self.gateway.create_research_object(&self.destination, &slug)
    }

    /// Folders inside the RO are created idempotently; any other folder URI
    /// is loaded as it is.
    fn open_folder(&self, ro: &ResearchObject, uri: &Url) -> Result<Folder, Wf2RoError> {
        match ro.relative_path(uri) {
            Some(path) if path.is_empty() => Err(Wf2RoError::invalid_destination(
                uri.as_str(),
                "the research object itself is not a folder",
            )),
            Some(path) => self.gateway.create_folder(ro, &path),
            None => self.gateway.load_folder(uri),
        }
    }

    fn upload_main(
        &self,
        ro: &mut ResearchObject,
        names: &mut NameAllocator,
        bundle: &WorkflowBundle,
    ) -> Result<Url, Wf2RoError> {
        let folder = match &self.folders.main {
            Some(uri) => Some(self.open_folder(ro, uri)?),
            None => None,
        };
        let entry_name = format!("{}.{BUNDLE_EXTENSION}", sanitize(&bundle.main()?.name));
        let slug = names.allocate(folder.as_ref().map(|f| &f.uri), &entry_name);

        let resource = self.upload_streamed(ro, &slug, BUNDLE_MEDIA_TYPE, |out| write_bundle(bundle, out))?;
        if let Some(folder) = &folder {
            self.gateway.add_folder_entry(&folder.uri, &resource, &entry_name)?;
        }
        Ok(resource)
    }

    fn upload_streamed<G>(
        &self,
        ro: &mut ResearchObject,
        slug: &str,
        content_type: &str,
        generate: G,
    ) -> Result<Url, Wf2RoError>
    where
        G: FnOnce(&mut PipeWriter) -> Result<(), Wf2RoError> + Send,
    {
        let gateway = self.gateway;
        let target: &ResearchObject = ro;
        let resource = pipe::stream_document(
            self.pipe_capacity,
            Some(self.cancel.clone()),
            generate,
            |reader| gateway.upload_resource(target, slug, Payload::from_reader(reader, content_type)),
        )?;
        self.record(ro, &resource);
        Ok(resource)
    }

    fn annotate_streamed<G>(
        &self,
        ro: &mut ResearchObject,
        name: &str,
        target: &Url,
        content_type: &str,
        generate: G,
    ) -> Result<(), Wf2RoError>
    where
        G: FnOnce(&mut PipeWriter) -> Result<(), Wf2RoError> + Send,
    {
        let gateway = self.gateway;
        let current: &ResearchObject = ro;
        let targets = [target.clone()];
        let annotation = pipe::stream_document(
            self.pipe_capacity,
            Some(self.cancel.clone()),
            generate,
            |reader| gateway.annotate(current, name, &targets, Payload::from_reader(reader, content_type)),
        )?;
        self.record(ro, &annotation.body);
        Ok(())
    }

    fn annotate_bytes(
        &self,
        ro: &mut ResearchObject,
        name: &str,
        target: &Url,
        payload: Payload,
    ) -> Result<(), Wf2RoError> {
        let annotation = self
            .gateway
            .annotate(ro, name, std::slice::from_ref(target), payload)?;
        self.record(ro, &annotation.body);
        Ok(())
    }

    fn copy_annotation(
        &self,
        ro: &mut ResearchObject,
        main_resource: &Url,
        bundle: &WorkflowBundle,
        annotation: &BundleAnnotation,
    ) -> Result<(), Wf2RoError> {
        let (body_uri, resource) = bundle.annotation_body(annotation)?;
        let is_turtle = resource.media_type.starts_with(TURTLE_MEDIA_TYPE);
        let content = if is_turtle && !resource.content.contains("@base") {
            format!("@base <{body_uri}> .\n{}", resource.content)
        } else {
            resource.content.clone()
        };
        self.annotate_bytes(ro, "wf", main_resource, Payload::from_bytes(content, &resource.media_type))
    }

    fn link(
        &self,
        ro: &mut ResearchObject,
        resource: &Url,
        workflow: Option<&Url>,
    ) -> Result<(), Wf2RoError> {
        let graph = link_graph(&self.source, resource, workflow);
        self.annotate_bytes(ro, "link", resource, Payload::from_bytes(graph.to_turtle(), TURTLE_MEDIA_TYPE))
    }

    fn extract_nested_workflows(
        &mut self,
        ro: &mut ResearchObject,
        names: &mut NameAllocator,
        bundle: &mut WorkflowBundle,
        folder_uri: &Url,
    ) -> Result<(), Wf2RoError> {
        self.check_cancelled()?;
        let opened = self.open_folder(ro, folder_uri);
        let Some(mut folder) = self.soft("nested workflow folder", opened)? else {
            return Ok(());
        };

        let nested: Vec<String> = bundle
            .workflows
            .iter()
            .filter(|workflow| workflow.name != bundle.main_workflow)
            .map(|workflow| workflow.name.clone())
            .collect();
        for name in nested {
            self.check_cancelled()?;
            let result = self.extract_nested(ro, names, &mut folder, bundle, &name);
            self.soft(&format!("nested workflow {name}"), result)?;
        }
        Ok(())
    }

    fn extract_nested(
        &self,
        ro: &mut ResearchObject,
        names: &mut NameAllocator,
        folder: &mut Folder,
        bundle: &mut WorkflowBundle,
        name: &str,
    ) -> Result<(), Wf2RoError> {
        let identifier = bundle
            .workflow(name)
            .map(|workflow| workflow.identifier.clone())
            .ok_or_else(|| Wf2RoError::BundleParse(format!("workflow {name} not found")))?;
        let uuid = digest::workflow_uuid(&identifier).to_string();
        if let Some(entry) = folder.entry_containing(&uuid) {
            debug!(workflow = name, entry = %entry.name, "nested workflow already extracted");
            return Ok(());
        }

        let entry_name = format!("{}-{uuid}.{BUNDLE_EXTENSION}", sanitize(name));
        let slug = names.allocate(Some(&folder.uri), &entry_name);
        let resource = {
            let nested = bundle.repoint_main(name)?;
            self.upload_streamed(ro, &slug, BUNDLE_MEDIA_TYPE, |out| write_bundle(&nested, out))?
        };

        let entry = self.gateway.add_folder_entry(&folder.uri, &resource, &entry_name)?;
        folder.entries.push(entry);
        self.link(ro, &resource, Some(&identifier))
    }

    fn extract_scripts(
        &mut self,
        ro: &mut ResearchObject,
        names: &mut NameAllocator,
        bundle: &WorkflowBundle,
        folder_uri: &Url,
    ) -> Result<(), Wf2RoError> {
        self.check_cancelled()?;
        let opened = self.open_folder(ro, folder_uri);
        let Some(mut folder) = self.soft("script folder", opened)? else {
            return Ok(());
        };

        let configurations = bundle
            .profiles
            .iter()
            .flat_map(|profile| profile.configurations.iter());
        for configuration in configurations {
            let Some(script) = configuration.script() else {
                continue;
            };
            self.check_cancelled()?;
            let result = self.extract_script(ro, names, &mut folder, &configuration.name, script);
            self.soft(&format!("script of {}", configuration.name), result)?;
        }
        Ok(())
    }

    fn extract_script(
        &self,
        ro: &mut ResearchObject,
        names: &mut NameAllocator,
        folder: &mut Folder,
        configuration: &str,
        script: &str,
    ) -> Result<(), Wf2RoError> {
        let sha = digest::utf8_sha1(script);
        let entry_name = format!("{}-{sha}.txt", sanitize(configuration));

        if let Some(existing) = folder.entry_containing(&sha).map(|entry| entry.resource.clone()) {
            if folder.entry_named(&entry_name).is_none() {
                debug!(configuration, resource = %existing, "script already uploaded, adding entry");
                let entry = self.gateway.add_folder_entry(&folder.uri, &existing, &entry_name)?;
                folder.entries.push(entry);
            }
            return Ok(());
        }

        let slug = names.allocate(Some(&folder.uri), &entry_name);
        let resource = self.gateway.upload_resource(
            ro,
            &slug,
            Payload::from_bytes(script.as_bytes(), SCRIPT_MEDIA_TYPE),
        )?;
        self.record(ro, &resource);
        let entry = self.gateway.add_folder_entry(&folder.uri, &resource, &entry_name)?;
        folder.entries.push(entry);
        self.link(ro, &resource, None)
    }
}
