use super::{AaguidIter, MetadataService, MetadataStore};
use crate::cache::{CacheStatus, LoadOnce, Loaded};
use crate::error::{MdsError, MdsResult};
use crate::events::{EventDispatcher, MetadataEvent, NullEventDispatcher};
use crate::model::{MetadataStatement, StatusReport};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decode a single statement, optionally wrapped in base64.
pub(crate) fn decode_statement(data: &[u8], is_base64_encoded: bool) -> MdsResult<MetadataStatement> {
    if is_base64_encoded {
        let compact: Vec<u8> = data
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let decoded = STANDARD.decode(compact)?;
        Ok(serde_json::from_slice(&decoded)?)
    } else {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A single statement read from a file on first use.
#[derive(Debug)]
pub struct LocalResourceMetadataService {
    path: PathBuf,
    is_base64_encoded: bool,
    cache: LoadOnce<MetadataStore>,
    dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>,
}

impl LocalResourceMetadataService {
    /// Serve the statement held in the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P, is_base64_encoded: bool) -> Self {
        LocalResourceMetadataService {
            path: path.as_ref().to_path_buf(),
            is_base64_encoded,
            cache: LoadOnce::new(),
            dispatcher: Arc::new(NullEventDispatcher),
        }
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
            let source = self.path.display().to_string();
            let result = std::fs::read(&self.path)
                .map_err(MdsError::from)
                .and_then(|data| decode_statement(&data, self.is_base64_encoded));

            match result {
                Ok(statement) => {
                    let mut store = MetadataStore::new();
                    store.insert_statement(statement);
                    debug!(%source, "loaded metadata statement");
                    self.dispatcher.dispatch(&MetadataEvent::Loaded {
                        source,
                        statements: store.len(),
                        skipped: 0,
                    });
                    Ok(Loaded::complete(store))
                }
                Err(e) => {
                    error!(%source, ?e, "unable to load metadata statement");
                    self.dispatcher.dispatch(&MetadataEvent::LoadFailed {
                        source,
                        reason: e.to_string(),
                    });
                    Err(e)
                }
            }
        })
    }
}

impl MetadataService for LocalResourceMetadataService {
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

/// Statements supplied as JSON documents.
#[derive(Debug, Clone)]
pub struct StringMetadataService {
    store: Arc<MetadataStore>,
}

impl StringMetadataService {
    /// Decode every document in `statements`. Any malformed document is an error.
    pub fn new<S: AsRef<str>>(statements: &[S]) -> MdsResult<Self> {
        let mut store = MetadataStore::new();
        for statement in statements {
            store.insert_statement(serde_json::from_str(statement.as_ref())?);
        }
        Ok(StringMetadataService {
            store: Arc::new(store),
        })
    }
}

impl MetadataService for StringMetadataService {
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
