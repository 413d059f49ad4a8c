use std::fmt::Write as _;
use std::io::Write;
use std::str::CharIndices;

use url::Url;

use crate::error::Wf2RoError;

pub mod vocab {
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
    pub const ORE: &str = "http://www.openarchives.org/ore/terms/";
    pub const RO: &str = "http://purl.org/wf4ever/ro#";
    pub const AO: &str = "http://purl.org/ao/";
    pub const PAV: &str = "http://purl.org/pav/";
    pub const PROV: &str = "http://www.w3.org/ns/prov#";
    pub const WFDESC: &str = "http://purl.org/wf4ever/wfdesc#";
    pub const ROEVO: &str = "http://purl.org/wf4ever/roevo#";

    pub const PREFIXES: &[(&str, &str)] = &[
        ("rdf", RDF),
        ("rdfs", RDFS),
        ("ore", ORE),
        ("ro", RO),
        ("ao", AO),
        ("pav", PAV),
        ("prov", PROV),
        ("wfdesc", WFDESC),
        ("roevo", ROEVO),
    ];

    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
    pub const AGGREGATES: &str = "http://www.openarchives.org/ore/terms/aggregates";
    pub const PROXY_FOR: &str = "http://www.openarchives.org/ore/terms/proxyFor";
    pub const ENTRY_NAME: &str = "http://purl.org/wf4ever/ro#entryName";
    pub const RO_FOLDER: &str = "http://purl.org/wf4ever/ro#Folder";
    pub const RO_FOLDER_ENTRY: &str = "http://purl.org/wf4ever/ro#FolderEntry";
    pub const RO_RESOURCE: &str = "http://purl.org/wf4ever/ro#Resource";
    pub const RO_AGGREGATED_ANNOTATION: &str = "http://purl.org/wf4ever/ro#AggregatedAnnotation";
    pub const AO_BODY: &str = "http://purl.org/ao/body";
    pub const ANNOTATES_RESOURCE: &str = "http://purl.org/ao/annotatesResource";
    pub const IMPORTED_FROM: &str = "http://purl.org/pav/importedFrom";
    pub const DERIVED_FROM: &str = "http://purl.org/pav/derivedFrom";
    pub const HAS_WORKFLOW_DEFINITION: &str = "http://purl.org/wf4ever/wfdesc#hasWorkflowDefinition";
    pub const WAS_REVISION_OF: &str = "http://www.w3.org/ns/prov#wasRevisionOf";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Iri(String),
    /// Blank node, labelled with its `_:` prefix.
    Blank(String),
    Literal(String),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(value.into())
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Term::Literal(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

/// A small ordered set of triples with Turtle output and N-Triples input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subject: impl Into<String>, predicate: &str, object: Term) {
        let triple = Triple {
            subject: subject.into(),
            predicate: predicate.to_string(),
            object,
        };
        if !self.triples.contains(&triple) {
            self.triples.push(triple);
        }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn objects<'a>(&'a self, subject: &'a str, predicate: &'a str) -> impl Iterator<Item = &'a Term> {
        self.triples
            .iter()
            .filter(move |t| t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    pub fn subjects_with<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = &'a str> {
        self.triples
            .iter()
            .filter(move |t| t.predicate == predicate)
            .map(|t| t.subject.as_str())
    }

    pub fn has_type(&self, subject: &str, class: &str) -> bool {
        self.objects(subject, vocab::TYPE)
            .any(|object| object.as_iri() == Some(class))
    }

    pub fn to_turtle(&self) -> String {
        let mut out = String::new();
        for (prefix, namespace) in vocab::PREFIXES {
            let used = self.triples.iter().any(|t| {
                t.predicate.starts_with(namespace)
                    || t.object.as_iri().is_some_and(|iri| iri.starts_with(namespace))
            });
            if used {
                let _ = writeln!(out, "@prefix {prefix}: <{namespace}> .");
            }
        }
        if !out.is_empty() {
            out.push('\n');
        }

        let mut subjects: Vec<&str> = Vec::new();
        for triple in &self.triples {
            if !subjects.contains(&triple.subject.as_str()) {
                subjects.push(&triple.subject);
            }
        }
        for subject in subjects {
            let statements = self
                .triples
                .iter()
                .filter(|t| t.subject == subject)
                .map(|t| format!("{} {}", compact(&t.predicate), render_object(&t.object)))
                .collect::<Vec<_>>();
            let _ = writeln!(out, "{} {} .", render_node(subject), statements.join(" ;\n    "));
        }
        out
    }

    pub fn write_turtle(&self, out: &mut dyn Write) -> Result<(), Wf2RoError> {
        out.write_all(self.to_turtle().as_bytes())?;
        Ok(())
    }

    pub fn parse_ntriples(text: &str) -> Result<Self, Wf2RoError> {
        let mut graph = Graph::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let triple = parse_ntriple_line(line).ok_or_else(|| {
                Wf2RoError::ManifestInconsistency(format!(
                    "malformed N-Triples statement on line {}",
                    idx + 1
                ))
            })?;
            graph.triples.push(triple);
        }
        Ok(graph)
    }
}

/// Provenance link from an aggregated resource back to the source it was
/// imported from. With a known workflow identifier the workflow is also
/// declared to have the aggregated resource as its definition.
pub fn link_graph(original: &Url, aggregated: &Url, workflow: Option<&Url>) -> Graph {
    let mut graph = Graph::new();
    match workflow {
        Some(workflow) => {
            graph.add(
                aggregated.as_str(),
                vocab::IMPORTED_FROM,
                Term::iri(original.as_str()),
            );
            graph.add(
                workflow.as_str(),
                vocab::HAS_WORKFLOW_DEFINITION,
                Term::iri(aggregated.as_str()),
            );
        }
        None => {
            graph.add(
                aggregated.as_str(),
                vocab::DERIVED_FROM,
                Term::iri(original.as_str()),
            );
        }
    }
    graph
}

fn compact(iri: &str) -> String {
    if iri == vocab::TYPE {
        return "a".to_string();
    }
    for (prefix, namespace) in vocab::PREFIXES {
        if let Some(local) = iri.strip_prefix(namespace) {
            if !local.is_empty() && local.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
                return format!("{prefix}:{local}");
            }
        }
    }
    format!("<{iri}>")
}

fn render_node(subject: &str) -> String {
    if subject.starts_with("_:") {
        subject.to_string()
    } else {
        format!("<{subject}>")
    }
}

fn render_object(object: &Term) -> String {
    match object {
        Term::Iri(iri) => compact(iri),
        Term::Blank(label) => label.clone(),
        Term::Literal(value) => format!("\"{}\"", escape_literal(value)),
    }
}

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn parse_ntriple_line(line: &str) -> Option<Triple> {
    let rest = line.strip_suffix('.')?.trim_end();
    let (subject, rest) = match take_node(rest)? {
        (Term::Iri(value) | Term::Blank(value), rest) => (value, rest),
        (Term::Literal(_), _) => return None,
    };
    let (predicate, rest) = take_iri(rest.trim_start())?;
    let rest = rest.trim_start();
    let (object, tail) = if rest.starts_with('"') {
        let (value, tail) = take_literal(rest)?;
        (Term::Literal(value), skip_literal_suffix(tail)?)
    } else {
        take_node(rest)?
    };
    if !tail.trim().is_empty() {
        return None;
    }
    Some(Triple {
        subject,
        predicate,
        object,
    })
}

fn take_node(input: &str) -> Option<(Term, &str)> {
    if let Some(label) = input.strip_prefix("_:") {
        let end = label.find(char::is_whitespace).unwrap_or(label.len());
        if end == 0 {
            return None;
        }
        return Some((Term::Blank(format!("_:{}", &label[..end])), &label[end..]));
    }
    let (iri, rest) = take_iri(input)?;
    Some((Term::Iri(iri), rest))
}

fn take_iri(input: &str) -> Option<(String, &str)> {
    let input = input.strip_prefix('<')?;
    let end = input.find('>')?;
    Some((input[..end].to_string(), &input[end + 1..]))
}

fn take_literal(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut chars = body.char_indices();
    let mut value = String::new();
    loop {
        let (idx, ch) = chars.next()?;
        match ch {
            '"' => return Some((value, &body[idx + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => value.push('\n'),
                'r' => value.push('\r'),
                't' => value.push('\t'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'u' => value.push(take_code_point(&mut chars, 4)?),
                'U' => value.push(take_code_point(&mut chars, 8)?),
                other => value.push(other),
            },
            other => value.push(other),
        }
    }
}

fn take_code_point(chars: &mut CharIndices<'_>, digits: usize) -> Option<char> {
    let hex: String = chars.by_ref().take(digits).map(|(_, ch)| ch).collect();
    if hex.chars().count() != digits {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
}

// Datatype and language tags are dropped; only the lexical form is kept.
fn skip_literal_suffix(tail: &str) -> Option<&str> {
    if let Some(tag) = tail.strip_prefix('@') {
        let end = tag.find(char::is_whitespace).unwrap_or(tag.len());
        return (end > 0).then(|| &tag[end..]);
    }
    if let Some(datatype) = tail.strip_prefix("^^") {
        return take_iri(datatype).map(|(_, rest)| rest);
    }
    Some(tail)
}
