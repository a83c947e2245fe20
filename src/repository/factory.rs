use crate::error::Result;
use crate::python::{EndOfLifeClient, PyPiClient};
use crate::repository::{InterpreterReleases, PackageIndex};
use std::sync::Arc;

pub struct RepositoryFactory;

impl RepositoryFactory {
    pub fn create_pypi(index_url: &str) -> Result<Arc<dyn PackageIndex>> {
        Ok(Arc::new(PyPiClient::new(index_url)?))
    }

    pub fn create_python_releases(feed_url: &str) -> Result<Arc<dyn InterpreterReleases>> {
        Ok(Arc::new(EndOfLifeClient::new(feed_url)?))
    }
}
