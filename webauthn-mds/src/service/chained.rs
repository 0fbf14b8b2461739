use super::{AaguidIter, MetadataService};
use crate::error::{MdsError, MdsResult};
use crate::model::{MetadataStatement, StatusReport};
use std::sync::Arc;

/// Consults several services in order. The first service that has a statement for an
/// AAGUID answers for it, including its status reports.
#[derive(Debug, Default, Clone)]
pub struct ChainedMetadataService {
    services: Vec<Arc<dyn MetadataService>>,
}

impl ChainedMetadataService {
    /// Consult `services` in the given order.
    pub fn new(services: Vec<Arc<dyn MetadataService>>) -> Self {
        ChainedMetadataService { services }
    }

    /// Consult `service` after every service already added.
    pub fn add_service(&mut self, service: Arc<dyn MetadataService>) -> &mut Self {
        self.services.push(service);
        self
    }

    fn first_having(&self, aaguid: &str) -> MdsResult<Option<&Arc<dyn MetadataService>>> {
        for service in &self.services {
            if service.has(aaguid)? {
                return Ok(Some(service));
            }
        }
        Ok(None)
    }
}

impl MetadataService for ChainedMetadataService {
    fn list(&self) -> MdsResult<AaguidIter> {
        let mut names = Vec::new();
        for service in &self.services {
            names.extend(service.list()?);
        }
        Ok(AaguidIter::from_names(names))
    }

    fn has(&self, aaguid: &str) -> MdsResult<bool> {
        self.first_having(aaguid).map(|s| s.is_some())
    }

    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        match self.first_having(aaguid)? {
            Some(service) => service.get(aaguid),
            None => Err(MdsError::NotFound(aaguid.to_string())),
        }
    }

    fn get_status_reports(&self, aaguid: &str) -> MdsResult<Vec<StatusReport>> {
        match self.first_having(aaguid)? {
            Some(service) => service.get_status_reports(aaguid),
            None => Ok(Vec::new()),
        }
    }
}
