//! Metadata services answer "what do we know about the authenticator with this AAGUID?".
//!
//! Several sources are provided:
//!
//! * [InMemoryMetadataService] - statements supplied by the application.
//! * [StringMetadataService] - statements supplied as JSON text.
//! * [LocalResourceMetadataService] - a single statement in a file.
//! * [FolderResourceMetadataService] - a folder of statement files named by AAGUID.
//! * [DistantResourceMetadataService] - a single statement fetched over HTTP.
//! * [FidoAllianceCompliantMetadataService] - the signed BLOB published by the FIDO Alliance.
//! * [ChainedMetadataService] - an ordered combination of the above.
//!
//! ⚠️  Only the FIDO Alliance BLOB is authenticated. Every other source is trusted as is, so
//! the integrity of those files and endpoints is your responsibility.

use crate::error::{MdsError, MdsResult};
use crate::model::{MetadataStatement, StatusReport};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

mod chained;
mod distant;
mod fido;
mod folder;
mod local;
mod memory;

pub use self::chained::ChainedMetadataService;
pub use self::distant::DistantResourceMetadataService;
pub use self::fido::{
    index_payload, verify_blob, BlobInfo, FidoAllianceCompliantMetadataService,
    FidoAllianceCompliantMetadataServiceBuilder, FIDO_MDS_ROOT_CERTIFICATE_URL, FIDO_MDS_URL,
    GLOBAL_SIGN_ROOT_CA_R3,
};
pub use self::folder::FolderResourceMetadataService;
pub use self::local::{LocalResourceMetadataService, StringMetadataService};
pub use self::memory::InMemoryMetadataService;

/// A source of metadata statements and status reports, keyed by AAGUID.
pub trait MetadataService: fmt::Debug + Send + Sync {
    /// The AAGUIDs this service knows. Each is yielded exactly once.
    fn list(&self) -> MdsResult<AaguidIter>;

    /// If a statement exists for `aaguid`.
    fn has(&self, aaguid: &str) -> MdsResult<bool>;

    /// The statement for `aaguid`, or [MdsError::NotFound].
    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement>;

    /// The status reports for `aaguid`, empty when none are known.
    fn get_status_reports(&self, aaguid: &str) -> MdsResult<Vec<StatusReport>>;
}

/// Statements and status reports indexed by AAGUID.
#[derive(Debug, Default, Clone)]
pub struct MetadataStore {
    statements: BTreeMap<String, MetadataStatement>,
    status_reports: BTreeMap<String, Vec<StatusReport>>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statement, indexed by its AAGUID. Statements identified otherwise are not
    /// addressable by AAGUID and are ignored. Returns if the statement was added.
    pub fn insert_statement(&mut self, statement: MetadataStatement) -> bool {
        match statement.aaguid().map(str::to_string) {
            Some(aaguid) => {
                self.statements.insert(aaguid, statement);
                true
            }
            None => {
                debug!(description = %statement.description, "statement has no aaguid, ignoring");
                false
            }
        }
    }

    /// Set the status reports of `aaguid`.
    pub fn insert_status_reports(&mut self, aaguid: &str, reports: Vec<StatusReport>) {
        self.status_reports.insert(aaguid.to_string(), reports);
    }

    /// Number of statements held.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// If no statements are held.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// If a statement for `aaguid` is held.
    pub fn has(&self, aaguid: &str) -> bool {
        self.statements.contains_key(aaguid)
    }

    /// A copy of the statement for `aaguid`.
    pub fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        self.statements
            .get(aaguid)
            .cloned()
            .ok_or_else(|| MdsError::NotFound(aaguid.to_string()))
    }

    /// The status reports of `aaguid`.
    pub fn get_status_reports(&self, aaguid: &str) -> Vec<StatusReport> {
        self.status_reports.get(aaguid).cloned().unwrap_or_default()
    }
}

/// A lazy iterator over the AAGUIDs of a [MetadataStore]. It holds a reference to the store
/// and steps through it in order, so listing never copies the whole index.
#[derive(Debug, Clone)]
pub struct AaguidIter {
    inner: AaguidIterInner,
}

#[derive(Debug, Clone)]
enum AaguidIterInner {
    Store {
        store: Arc<MetadataStore>,
        cursor: Option<String>,
    },
    Owned(std::vec::IntoIter<String>),
}

impl AaguidIter {
    /// Iterate over the AAGUIDs of `store`.
    pub fn new(store: Arc<MetadataStore>) -> Self {
        AaguidIter {
            inner: AaguidIterInner::Store {
                store,
                cursor: None,
            },
        }
    }

    /// Iterate over an already materialised list. Duplicates are removed.
    pub fn from_names(mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        AaguidIter {
            inner: AaguidIterInner::Owned(names.into_iter()),
        }
    }
}

impl Iterator for AaguidIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match &mut self.inner {
            AaguidIterInner::Store { store, cursor } => {
                let lower = match cursor.as_deref() {
                    Some(c) => Bound::Excluded(c),
                    None => Bound::Unbounded,
                };
                let next = store
                    .statements
                    .range::<str, _>((lower, Bound::Unbounded))
                    .next()
                    .map(|(k, _)| k.clone())?;
                *cursor = Some(next.clone());
                Some(next)
            }
            AaguidIterInner::Owned(names) => names.next(),
        }
    }
}
