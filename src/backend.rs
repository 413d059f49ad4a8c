use std::time::Duration;

use crate::bundle_io::{BundleReader, HttpBundleReader};
use crate::config::ServiceConfig;
use crate::error::Wf2RoError;
use crate::gateway::UploadGateway;
use crate::pipe;
use crate::rosrs::RosrsClient;

/// Builds the collaborators a job needs. Called on the job's own thread, so
/// implementations may create blocking clients.
pub trait Backend: Send + Sync {
    fn bundle_reader(&self) -> Result<Box<dyn BundleReader>, Wf2RoError>;

    fn gateway(&self, token: &str) -> Result<Box<dyn UploadGateway>, Wf2RoError>;

    fn pipe_capacity(&self) -> usize {
        pipe::DEFAULT_CAPACITY
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    timeout: Duration,
    pipe_capacity: usize,
}

impl HttpBackend {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            timeout: config.http_timeout(),
            pipe_capacity: config.pipe_capacity,
        }
    }
}

impl Backend for HttpBackend {
    fn bundle_reader(&self) -> Result<Box<dyn BundleReader>, Wf2RoError> {
        Ok(Box::new(HttpBundleReader::new(self.timeout)?))
    }

    fn gateway(&self, token: &str) -> Result<Box<dyn UploadGateway>, Wf2RoError> {
        Ok(Box::new(RosrsClient::new(token, self.timeout)?))
    }

    fn pipe_capacity(&self) -> usize {
        self.pipe_capacity
    }
}
