use super::local::decode_statement;
use super::{AaguidIter, MetadataService, MetadataStore};
use crate::cache::{CacheStatus, LoadOnce, Loaded};
use crate::error::MdsResult;
use crate::events::{EventDispatcher, MetadataEvent, NullEventDispatcher};
use crate::http::{fetch, HttpClient};
use crate::model::{MetadataStatement, StatusReport};
use std::sync::Arc;
use url::Url;

/// A single statement fetched over HTTP on first use. The response is not authenticated.
#[derive(Debug)]
pub struct DistantResourceMetadataService {
    uri: Url,
    headers: Vec<(String, String)>,
    is_base64_encoded: bool,
    client: Arc<dyn HttpClient>,
    cache: LoadOnce<MetadataStore>,
    dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>,
}

impl DistantResourceMetadataService {
    /// Serve the statement published at `uri`.
    pub fn new(client: Arc<dyn HttpClient>, uri: Url, is_base64_encoded: bool) -> Self {
        DistantResourceMetadataService {
            uri,
            headers: Vec::new(),
            is_base64_encoded,
            client,
            cache: LoadOnce::new(),
            dispatcher: Arc::new(NullEventDispatcher),
        }
    }

    /// Send `name: value` with the request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Report loads to `dispatcher`.
    pub fn with_event_dispatcher(
        mut self,
        dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>,
    ) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// The state of the load.
    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    fn store(&self) -> MdsResult<Arc<MetadataStore>> {
        self.cache.get_or_load(|| {
            let result = fetch(self.client.as_ref(), &self.uri, &self.headers)
                .and_then(|body| decode_statement(&body, self.is_base64_encoded));

            match result {
                Ok(statement) => {
                    let mut store = MetadataStore::new();
                    store.insert_statement(statement);
                    self.dispatcher.dispatch(&MetadataEvent::Loaded {
                        source: self.uri.to_string(),
                        statements: store.len(),
                        skipped: 0,
                    });
                    Ok(Loaded::complete(store))
                }
                Err(e) => {
                    error!(uri = %self.uri, ?e, "unable to load metadata statement");
                    self.dispatcher.dispatch(&MetadataEvent::LoadFailed {
                        source: self.uri.to_string(),
                        reason: e.to_string(),
                    });
                    Err(e)
                }
            }
        })
    }
}

impl MetadataService for DistantResourceMetadataService {
    fn list(&self) -> MdsResult<AaguidIter> {
        self.store().map(AaguidIter::new)
    }

    fn has(&self, aaguid: &str) -> MdsResult<bool> {
        Ok(self.store()?.has(aaguid))
    }

    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        self.store()?.get(aaguid)
    }

    fn get_status_reports(&self, aaguid: &str) -> MdsResult<Vec<StatusReport>> {
        Ok(self.store()?.get_status_reports(aaguid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::tests::statement_json;
    use crate::service::tests::assert_service_invariants;
    use crate::test_utils::MockHttpClient;
    use base64::{engine::general_purpose::STANDARD, Engine};

    const URI: &str = "https://metadata.example.com/statement.json";

    #[test]
    fn distant_service_fetches_once() {
        let body = serde_json::to_vec(&statement_json("distant-aaguid")).expect("json");
        let client = Arc::new(MockHttpClient::default().with(URI, 200, body));
        let service = DistantResourceMetadataService::new(
            client.clone(),
            Url::parse(URI).expect("url"),
            false,
        )
        .with_header("x-api-key", "secret");

        assert!(service.has("distant-aaguid").expect("has"));
        assert_service_invariants(&service);
        assert_eq!(client.request_count(), 1);

        let seen = client.seen_headers.lock().expect("lock");
        assert_eq!(seen[0], vec![("x-api-key".to_string(), "secret".to_string())]);
    }

    #[test]
    fn distant_service_base64() {
        let body = STANDARD
            .encode(serde_json::to_vec(&statement_json("distant-b64")).expect("json"))
            .into_bytes();
        let client = Arc::new(MockHttpClient::default().with(URI, 200, body));
        let service =
            DistantResourceMetadataService::new(client, Url::parse(URI).expect("url"), true);
        assert!(service.get("distant-b64").is_ok());
    }

    #[test]
    fn distant_service_failures() {
        for (status, body) in [(500u16, b"oops".to_vec()), (200, Vec::new())] {
            let client = Arc::new(MockHttpClient::default().with(URI, status, body));
            let service =
                DistantResourceMetadataService::new(client, Url::parse(URI).expect("url"), false);
            assert_eq!(
                service.get("any").expect_err("fail").kind(),
                ErrorKind::MetadataLoadFailure
            );
            assert!(matches!(service.status(), CacheStatus::Failed { .. }));
        }
    }
}
