use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::backend::Backend;
pub use crate::convert::ExtractFolders;
use crate::convert::{AddedResources, ConversionOutcome, Converter};
use crate::error::Wf2RoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Done,
    Cancelled,
    InvalidResource,
    RuntimeError,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self != JobState::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub resource: Url,
    pub format: String,
    pub ro: Url,
    pub token: String,
    pub extract: ExtractFolders,
}

/// Snapshot of a job as reported to clients. The access token never appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub resource: Url,
    pub format: String,
    pub ro: Url,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub added: Vec<Url>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub extract: ExtractFolders,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Progress {
    state: JobState,
    reason: Option<String>,
    warnings: Vec<String>,
    finished: Option<DateTime<Utc>>,
}

/// One conversion request. A job runs its conversion at most once.
#[derive(Debug)]
pub struct Job {
    id: Uuid,
    request: JobRequest,
    created: DateTime<Utc>,
    started: AtomicBool,
    cancel: CancellationToken,
    added: AddedResources,
    progress: Mutex<Progress>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            created: Utc::now(),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            added: AddedResources::new(),
            progress: Mutex::new(Progress {
                state: JobState::Running,
                reason: None,
                warnings: Vec::new(),
                finished: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> JobState {
        self.progress().state
    }

    /// Runs the conversion on the calling thread and returns the final state.
    /// Any call after the first fails with [`Wf2RoError::AlreadyStarted`].
    pub fn run(&self, backend: &dyn Backend) -> Result<JobState, Wf2RoError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Wf2RoError::AlreadyStarted);
        }
        info!(job = %self.id, resource = %self.request.resource, ro = %self.request.ro, "job started");

        match self.execute(backend) {
            Ok(outcome) => self.settle(JobState::Done, None, outcome.warnings),
            Err(Wf2RoError::Cancelled) => self.settle(JobState::Cancelled, None, Vec::new()),
            Err(err) if err.is_input_error() => {
                warn!(job = %self.id, error = %err, "invalid workflow bundle");
                self.settle(JobState::InvalidResource, Some(err.to_string()), Vec::new())
            }
            Err(err) => {
                error!(job = %self.id, error = %err, "conversion failed");
                self.settle(JobState::RuntimeError, Some(err.report()), Vec::new())
            }
        }
        let state = self.state();
        info!(job = %self.id, state = ?state, added = self.added.len(), "job finished");
        Ok(state)
    }

    fn execute(&self, backend: &dyn Backend) -> Result<ConversionOutcome, Wf2RoError> {
        let reader = backend.bundle_reader()?;
        let mut bundle = reader.read_bundle(&self.request.resource, &self.request.format)?;
        if self.cancel.is_cancelled() {
            return Err(Wf2RoError::Cancelled);
        }
        let gateway = backend.gateway(&self.request.token)?;
        Converter::new(
            gateway.as_ref(),
            self.request.resource.clone(),
            self.request.ro.clone(),
        )
        .with_folders(self.request.extract.clone())
        .with_cancellation(self.cancel.clone())
        .with_progress(self.added.clone())
        .with_pipe_capacity(backend.pipe_capacity())
        .convert(&mut bundle)
    }

    /// Terminal states are final; later transitions are ignored.
    fn settle(&self, state: JobState, reason: Option<String>, warnings: Vec<String>) {
        let mut progress = self.progress();
        if progress.state.is_terminal() {
            return;
        }
        progress.state = state;
        progress.reason = reason;
        progress.warnings = warnings;
        progress.finished = Some(Utc::now());
    }

    /// Settles a job whose conversion ended without reporting a state.
    pub fn abandon(&self, reason: &str) {
        self.settle(JobState::RuntimeError, Some(reason.to_string()), Vec::new());
    }

    /// Marks a running job cancelled and signals its conversion to stop.
    /// Returns false when the job had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let mut progress = self.progress();
        if progress.state.is_terminal() {
            return false;
        }
        progress.state = JobState::Cancelled;
        progress.finished = Some(Utc::now());
        drop(progress);
        self.cancel.cancel();
        info!(job = %self.id, "job cancelled");
        true
    }

    pub fn status(&self) -> JobStatus {
        let progress = self.progress();
        JobStatus {
            id: self.id,
            resource: self.request.resource.clone(),
            format: self.request.format.clone(),
            ro: self.request.ro.clone(),
            status: progress.state,
            reason: progress.reason.clone(),
            added: self.added.snapshot(),
            warnings: progress.warnings.clone(),
            extract: self.request.extract.clone(),
            created: self.created,
            finished: progress.finished,
        }
    }
}
