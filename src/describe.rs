use std::io::Write;

use url::Url;

use crate::bundle::{Workflow, WorkflowBundle};
use crate::error::Wf2RoError;
use crate::rdf::{Graph, Term, vocab};

pub const TURTLE_MEDIA_TYPE: &str = "text/turtle";

const WFDESC_WORKFLOW: &str = "http://purl.org/wf4ever/wfdesc#Workflow";
const WFDESC_PROCESS: &str = "http://purl.org/wf4ever/wfdesc#Process";
const WFDESC_INPUT: &str = "http://purl.org/wf4ever/wfdesc#Input";
const WFDESC_OUTPUT: &str = "http://purl.org/wf4ever/wfdesc#Output";
const WFDESC_DATA_LINK: &str = "http://purl.org/wf4ever/wfdesc#DataLink";
const WFDESC_HAS_INPUT: &str = "http://purl.org/wf4ever/wfdesc#hasInput";
const WFDESC_HAS_OUTPUT: &str = "http://purl.org/wf4ever/wfdesc#hasOutput";
const WFDESC_HAS_SUB_PROCESS: &str = "http://purl.org/wf4ever/wfdesc#hasSubProcess";
const WFDESC_HAS_DATA_LINK: &str = "http://purl.org/wf4ever/wfdesc#hasDataLink";
const WFDESC_HAS_SOURCE: &str = "http://purl.org/wf4ever/wfdesc#hasSource";
const WFDESC_HAS_SINK: &str = "http://purl.org/wf4ever/wfdesc#hasSink";
const ROEVO_VERSIONABLE: &str = "http://purl.org/wf4ever/roevo#VersionableResource";
const PROV_ENTITY: &str = "http://www.w3.org/ns/prov#Entity";

/// Structural description of the main workflow and every workflow its
/// processors nest, using the wfdesc vocabulary.
pub fn workflow_description(bundle: &WorkflowBundle) -> Result<Graph, Wf2RoError> {
    let mut graph = Graph::new();
    let mut pending = vec![bundle.main()?];
    let mut seen: Vec<&str> = Vec::new();

    while let Some(workflow) = pending.pop() {
        if seen.contains(&workflow.name.as_str()) {
            continue;
        }
        seen.push(&workflow.name);
        let wf_uri = bundle.workflow_uri(workflow)?;
        describe_workflow(&mut graph, bundle, workflow, &wf_uri, &mut pending)?;
    }
    Ok(graph)
}

fn describe_workflow<'b>(
    graph: &mut Graph,
    bundle: &'b WorkflowBundle,
    workflow: &Workflow,
    wf_uri: &Url,
    pending: &mut Vec<&'b Workflow>,
) -> Result<(), Wf2RoError> {
    let wf = wf_uri.as_str();
    graph.add(wf, vocab::TYPE, Term::iri(WFDESC_WORKFLOW));
    graph.add(wf, vocab::LABEL, Term::literal(&workflow.name));

    for input in &workflow.inputs {
        let port = join(wf_uri, &format!("in/{input}"))?;
        graph.add(wf, WFDESC_HAS_INPUT, Term::iri(&port));
        graph.add(&port, vocab::TYPE, Term::iri(WFDESC_INPUT));
        graph.add(&port, vocab::LABEL, Term::literal(input));
    }
    for output in &workflow.outputs {
        let port = join(wf_uri, &format!("out/{output}"))?;
        graph.add(wf, WFDESC_HAS_OUTPUT, Term::iri(&port));
        graph.add(&port, vocab::TYPE, Term::iri(WFDESC_OUTPUT));
        graph.add(&port, vocab::LABEL, Term::literal(output));
    }

    for processor in &workflow.processors {
        let proc_uri = join(wf_uri, &format!("processor/{}/", processor.name))?;
        graph.add(wf, WFDESC_HAS_SUB_PROCESS, Term::iri(&proc_uri));
        graph.add(&proc_uri, vocab::TYPE, Term::iri(WFDESC_PROCESS));
        graph.add(&proc_uri, vocab::LABEL, Term::literal(&processor.name));
        if let Some(nested) = processor.nested_workflow.as_deref().and_then(|n| bundle.workflow(n)) {
            graph.add(&proc_uri, vocab::TYPE, Term::iri(WFDESC_WORKFLOW));
            graph.add(
                bundle.workflow_uri(nested)?.as_str(),
                vocab::HAS_WORKFLOW_DEFINITION,
                Term::iri(&proc_uri),
            );
            pending.push(nested);
        }
    }

    for (idx, link) in workflow.links.iter().enumerate() {
        let link_uri = join(wf_uri, &format!("datalink/{idx}"))?;
        let source = port_uri(wf_uri, &link.source, "in", "out")?;
        let sink = port_uri(wf_uri, &link.sink, "out", "in")?;
        graph.add(wf, WFDESC_HAS_DATA_LINK, Term::iri(&link_uri));
        graph.add(&link_uri, vocab::TYPE, Term::iri(WFDESC_DATA_LINK));
        graph.add(&link_uri, WFDESC_HAS_SOURCE, Term::iri(source));
        graph.add(&link_uri, WFDESC_HAS_SINK, Term::iri(sink));
    }
    Ok(())
}

// `processor:port` addresses a processor port; a bare name addresses the
// workflow's own port on the opposite side.
fn port_uri(wf_uri: &Url, reference: &str, workflow_side: &str, processor_side: &str) -> Result<String, Wf2RoError> {
    match reference.split_once(':') {
        Some((processor, port)) => join(wf_uri, &format!("processor/{processor}/{processor_side}/{port}")),
        None => join(wf_uri, &format!("{workflow_side}/{reference}")),
    }
}

/// Revision history of the main workflow as a `prov:wasRevisionOf` chain.
pub fn workflow_history(bundle: &WorkflowBundle) -> Result<Graph, Wf2RoError> {
    let main = bundle.main()?;
    let mut graph = Graph::new();
    let mut current = main.identifier.as_str();
    graph.add(current, vocab::TYPE, Term::iri(ROEVO_VERSIONABLE));
    graph.add(current, vocab::TYPE, Term::iri(PROV_ENTITY));
    graph.add(current, vocab::LABEL, Term::literal(&main.name));
    for revision in &main.revisions {
        graph.add(current, vocab::WAS_REVISION_OF, Term::iri(revision.as_str()));
        graph.add(revision.as_str(), vocab::TYPE, Term::iri(ROEVO_VERSIONABLE));
        current = revision.as_str();
    }
    Ok(graph)
}

pub fn write_workflow_description(bundle: &WorkflowBundle, out: &mut dyn Write) -> Result<(), Wf2RoError> {
    workflow_description(bundle)?.write_turtle(out)
}

pub fn write_workflow_history(bundle: &WorkflowBundle, out: &mut dyn Write) -> Result<(), Wf2RoError> {
    workflow_history(bundle)?.write_turtle(out)
}

fn join(base: &Url, path: &str) -> Result<String, Wf2RoError> {
    base.join(path)
        .map(String::from)
        .map_err(|err| Wf2RoError::invalid_uri(path, err))
}
