use super::{AaguidIter, MetadataService, MetadataStore};
use crate::error::MdsResult;
use crate::model::{MetadataStatement, StatusReport};
use std::sync::Arc;

/// Statements supplied directly by the application.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetadataService {
    store: Arc<MetadataStore>,
}

impl InMemoryMetadataService {
    /// Create a service holding `statements`. Statements without an AAGUID are ignored.
    pub fn new(statements: Vec<MetadataStatement>) -> Self {
        let mut store = MetadataStore::new();
        for statement in statements {
            store.insert_statement(statement);
        }
        InMemoryMetadataService {
            store: Arc::new(store),
        }
    }

    /// Add a statement, replacing any with the same AAGUID.
    pub fn add_statement(&mut self, statement: MetadataStatement) -> &mut Self {
        Arc::make_mut(&mut self.store).insert_statement(statement);
        self
    }

    /// Set the status reports of `aaguid`.
    pub fn add_status_reports(&mut self, aaguid: &str, reports: Vec<StatusReport>) -> &mut Self {
        Arc::make_mut(&mut self.store).insert_status_reports(aaguid, reports);
        self
    }
}

impl MetadataService for InMemoryMetadataService {
    fn list(&self) -> MdsResult<AaguidIter> {
        Ok(AaguidIter::new(self.store.clone()))
    }

    fn has(&self, aaguid: &str) -> MdsResult<bool> {
        Ok(self.store.has(aaguid))
    }

    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        self.store.get(aaguid)
    }

    fn get_status_reports(&self, aaguid: &str) -> MdsResult<Vec<StatusReport>> {
        Ok(self.store.get_status_reports(aaguid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::AuthenticatorStatus;
    use crate::service::tests::{assert_service_invariants, statement};

    #[test]
    fn in_memory_service() {
        let mut service = InMemoryMetadataService::new(vec![statement("aaguid-1")]);
        service.add_statement(statement("aaguid-2"));
        service.add_status_reports(
            "aaguid-2",
            vec![serde_json::from_value(serde_json::json!({
                "status": "ATTESTATION_KEY_COMPROMISE"
            }))
            .expect("report")],
        );

        assert_service_invariants(&service);
        assert_eq!(service.list().expect("list").count(), 2);
        assert_eq!(
            service.get("nope").expect_err("missing").kind(),
            ErrorKind::NotFound
        );
        assert!(!service.has("nope").expect("has"));

        let reports = service.get_status_reports("aaguid-2").expect("reports");
        assert_eq!(reports[0].status, AuthenticatorStatus::AttestationKeyCompromise);
        assert!(service.get_status_reports("aaguid-1").expect("reports").is_empty());
    }
}
