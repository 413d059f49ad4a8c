use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::Wf2RoError;

pub const WORKFLOW_ROOT: &str = "http://ns.taverna.org.uk/2010/workflow/";

/// In-memory workflow bundle: one designated main workflow, any number of
/// other workflows, embedded annotations, profiles and bundle-internal resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBundle {
    pub name: String,
    pub base_uri: Url,
    pub main_workflow: String,
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub annotations: Vec<BundleAnnotation>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub resources: BTreeMap<String, BundleResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub identifier: Url,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub processors: Vec<Processor>,
    #[serde(default)]
    pub links: Vec<DataLink>,
    /// Identifiers of earlier revisions, most recent first.
    #[serde(default)]
    pub revisions: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    pub name: String,
    #[serde(default)]
    pub nested_workflow: Option<String>,
}

/// A data link between ports written as `processor:port`, or a bare `port`
/// for workflow-level inputs (as source) and outputs (as sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLink {
    pub source: String,
    pub sink: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleAnnotation {
    pub target: AnnotationTarget,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationTarget {
    Bundle,
    Workflow(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleResource {
    pub media_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub json: Value,
}

impl Configuration {
    pub fn script(&self) -> Option<&str> {
        self.json
            .get("script")
            .and_then(Value::as_str)
            .filter(|script| !script.is_empty())
    }
}

impl WorkflowBundle {
    pub fn validate(&self) -> Result<(), Wf2RoError> {
        self.main()?;
        for annotation in &self.annotations {
            if let AnnotationTarget::Workflow(name) = &annotation.target {
                self.workflow(name).ok_or_else(|| {
                    Wf2RoError::BundleParse(format!("annotation targets unknown workflow {name}"))
                })?;
            }
        }
        Ok(())
    }

    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|wf| wf.name == name)
    }

    pub fn main(&self) -> Result<&Workflow, Wf2RoError> {
        self.workflow(&self.main_workflow).ok_or_else(|| {
            Wf2RoError::BundleParse(format!("main workflow {} not found", self.main_workflow))
        })
    }

    /// Bundle-internal URI of a workflow, `<base>workflow/<name>/`.
    pub fn workflow_uri(&self, workflow: &Workflow) -> Result<Url, Wf2RoError> {
        self.base_uri
            .join(&format!("workflow/{}/", workflow.name))
            .map_err(|err| Wf2RoError::invalid_uri(&workflow.name, err))
    }

    pub fn annotates_main(&self, annotation: &BundleAnnotation) -> bool {
        match &annotation.target {
            AnnotationTarget::Bundle => true,
            AnnotationTarget::Workflow(name) => *name == self.main_workflow,
            AnnotationTarget::Other(_) => false,
        }
    }

    /// Looks up an annotation body, accepting a path relative to the bundle or
    /// an absolute URI under the bundle base. Returns the resolved body URI.
    pub fn annotation_body(
        &self,
        annotation: &BundleAnnotation,
    ) -> Result<(Url, &BundleResource), Wf2RoError> {
        let resolved = self
            .base_uri
            .join(&annotation.body)
            .map_err(|err| Wf2RoError::invalid_uri(&annotation.body, err))?;
        let path = resolved
            .as_str()
            .strip_prefix(self.base_uri.as_str())
            .unwrap_or(&annotation.body);
        let resource = self.resources.get(path).ok_or_else(|| {
            Wf2RoError::BundleParse(format!("annotation body {path} not in bundle"))
        })?;
        Ok((resolved, resource))
    }

    /// Temporarily designates another workflow as main. The original
    /// designation is restored when the guard is dropped.
    pub fn repoint_main(&mut self, name: &str) -> Result<MainWorkflowGuard<'_>, Wf2RoError> {
        if self.workflow(name).is_none() {
            return Err(Wf2RoError::BundleParse(format!("workflow {name} not found")));
        }
        let original = std::mem::replace(&mut self.main_workflow, name.to_string());
        Ok(MainWorkflowGuard {
            bundle: self,
            original,
        })
    }
}

pub struct MainWorkflowGuard<'a> {
    bundle: &'a mut WorkflowBundle,
    original: String,
}

impl Deref for MainWorkflowGuard<'_> {
    type Target = WorkflowBundle;

    fn deref(&self) -> &Self::Target {
        &*self.bundle
    }
}

impl Drop for MainWorkflowGuard<'_> {
    fn drop(&mut self) {
        self.bundle.main_workflow = std::mem::take(&mut self.original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> WorkflowBundle {
        let workflow = |name: &str| Workflow {
            name: name.to_string(),
            identifier: Url::parse(&format!("{WORKFLOW_ROOT}{name}/")).unwrap(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            processors: Vec::new(),
            links: Vec::new(),
            revisions: Vec::new(),
        };
        WorkflowBundle {
            name: "b".to_string(),
            base_uri: Url::parse("http://ns.taverna.org.uk/2010/workflowBundle/b/").unwrap(),
            main_workflow: "main".to_string(),
            workflows: vec![workflow("main"), workflow("nested")],
            annotations: Vec::new(),
            profiles: Vec::new(),
            resources: BTreeMap::new(),
        }
    }

    #[test]
    fn guard_restores_main_workflow() {
        let mut bundle = bundle();
        {
            let guard = bundle.repoint_main("nested").unwrap();
            assert_eq!(guard.main().unwrap().name, "nested");
        }
        assert_eq!(bundle.main_workflow, "main");
    }

    #[test]
    fn unknown_workflow_is_rejected() {
        let mut bundle = bundle();
        assert!(bundle.repoint_main("missing").is_err());
        assert_eq!(bundle.main_workflow, "main");
    }

    #[test]
    fn body_lookup_accepts_absolute_uri() {
        let mut bundle = bundle();
        bundle.resources.insert(
            "annotation/a.ttl".to_string(),
            BundleResource {
                media_type: "text/turtle".to_string(),
                content: "<> a <x> .".to_string(),
            },
        );
        let annotation = BundleAnnotation {
            target: AnnotationTarget::Bundle,
            body: "http://ns.taverna.org.uk/2010/workflowBundle/b/annotation/a.ttl".to_string(),
        };
        let (uri, resource) = bundle.annotation_body(&annotation).unwrap();
        assert_eq!(uri.path(), "/2010/workflowBundle/b/annotation/a.ttl");
        assert_eq!(resource.media_type, "text/turtle");
    }
}
