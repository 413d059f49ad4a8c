use std::sync::Arc;
use std::thread;

use tracing::{error, info};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::Wf2RoError;
use crate::job::{Job, JobRequest, JobStatus};
use crate::registry::JobRegistry;

/// Runs every admitted job on its own thread and answers status and
/// cancellation requests through the shared registry.
#[derive(Clone)]
pub struct JobEngine {
    registry: Arc<JobRegistry>,
    backend: Arc<dyn Backend>,
}

impl JobEngine {
    pub fn new(registry: Arc<JobRegistry>, backend: Arc<dyn Backend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn submit(&self, request: JobRequest) -> Result<Uuid, Wf2RoError> {
        let job = self.registry.admit(request)?;
        let id = job.id();
        let registry = Arc::clone(&self.registry);
        let backend = Arc::clone(&self.backend);

        let spawned = thread::Builder::new()
            .name(format!("wf2ro-job-{}", id.simple()))
            .spawn(move || {
                let completion = Completion { registry, job };
                if let Err(err) = completion.job.run(backend.as_ref()) {
                    error!(job = %completion.job.id(), error = %err, "job did not run");
                }
            });

        if let Err(err) = spawned {
            self.registry.withdraw(id);
            return Err(Wf2RoError::Io(err));
        }
        info!(job = %id, "job submitted");
        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Result<JobStatus, Wf2RoError> {
        self.registry.status(id)
    }

    pub fn cancel(&self, id: Uuid) -> Result<(), Wf2RoError> {
        self.registry.cancel_or_discard(id)
    }
}

/// Moves the job to the finished table when its thread ends, including by panic.
struct Completion {
    registry: Arc<JobRegistry>,
    job: Arc<Job>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(job = %self.job.id(), "job thread panicked");
            self.job.abandon("conversion aborted: job thread panicked");
        }
        self.registry.complete(self.job.id());
    }
}
