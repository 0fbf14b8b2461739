use super::{AaguidIter, MetadataService, MetadataStore};
use crate::cache::{CacheStatus, LoadOnce, Loaded};
use crate::chain::{load_certificate, CertificateChainValidator};
use crate::error::{MdsError, MdsResult};
use crate::events::{EventDispatcher, MetadataEvent, NullEventDispatcher};
use crate::http::{fetch, HttpClient, ReqwestHttpClient, DEFAULT_TIMEOUT};
use crate::jws::{verify_compact, VerifiedJws};
use crate::model::{MetadataBLOBPayload, MetadataStatement, SkippedEntry, StatusReport};
use std::sync::Arc;
use url::Url;

/// Where the FIDO Alliance publishes the metadata BLOB.
pub const FIDO_MDS_URL: &str = "https://mds3.fidoalliance.org/";

/// Where the DER certificate of the root that anchors the FIDO Alliance BLOB is published.
pub const FIDO_MDS_ROOT_CERTIFICATE_URL: &str = "https://secure.globalsign.com/cacert/root-r3.crt";

/// The root that anchors the FIDO Alliance BLOB.
pub const GLOBAL_SIGN_ROOT_CA_R3: &str = r#"
-----BEGIN CERTIFICATE-----
MIIDXzCCAkegAwIBAgILBAAAAAABIVhTCKIwDQYJKoZIhvcNAQELBQAwTDEgMB4G
A1UECxMXR2xvYmFsU2lnbiBSb290IENBIC0gUjMxEzARBgNVBAoTCkdsb2JhbFNp
Z24xEzARBgNVBAMTCkdsb2JhbFNpZ24wHhcNMDkwMzE4MTAwMDAwWhcNMjkwMzE4
MTAwMDAwWjBMMSAwHgYDVQQLExdHbG9iYWxTaWduIFJvb3QgQ0EgLSBSMzETMBEG
A1UEChMKR2xvYmFsU2lnbjETMBEGA1UEAxMKR2xvYmFsU2lnbjCCASIwDQYJKoZI
hvcNAQEBBQADggEPADCCAQoCggEBAMwldpB5BngiFvXAg7aEyiie/QV2EcWtiHL8
RgJDx7KKnQRfJMsuS+FggkbhUqsMgUdwbN1k0ev1LKMPgj0MK66X17YUhhB5uzsT
gHeMCOFJ0mpiLx9e+pZo34knlTifBtc+ycsmWQ1z3rDI6SYOgxXG71uL0gRgykmm
KPZpO/bLyCiR5Z2KYVc3rHQU3HTgOu5yLy6c+9C7v/U9AOEGM+iCK65TpjoWc4zd
QQ4gOsC0p6Hpsk+QLjJg6VfLuQSSaGjlOCZgdbKfd/+RFO+uIEn8rUAVSNECMWEZ
XriX7613t2Saer9fwRPvm2L7DWzgVGkWqQPabumDk3F2xmmFghcCAwEAAaNCMEAw
DgYDVR0PAQH/BAQDAgEGMA8GA1UdEwEB/wQFMAMBAf8wHQYDVR0OBBYEFI/wS3+o
LkUkrk1Q+mOai97i3Ru8MA0GCSqGSIb3DQEBCwUAA4IBAQBLQNvAUKr+yAzv95ZU
RUm7lgAJQayzE4aGKAczymvmdLm6AC2upArT9fHxD4q/c2dKg8dEe3jgr25sbwMp
jjM5RcOO5LlXbKr8EpbsU8Yt5CRsuZRj+9xTaGdWPoO4zzUhw8lo/s7awlOqzJCK
6fBdRoyV3XpYKBovHd7NADdBj+1EbddTKJd+82cEHhXXipa0095MJ6RMG3NzdvQX
mcIfeg7jLQitChws/zyrVQ4PkX4268NXSb7hLi18YIvDQVETI53O9zJrlAGomecs
Mx86OyXShkDOOyyGeMlhLxS67ttVb9+E7gUJTb0o2HLO02JQZR7rkpeDMdmztcpH
WD9f
-----END CERTIFICATE-----
"#;

/// Verify a metadata BLOB and decode its payload.
///
/// When `trust` is provided, the `x5c` chain of the envelope must validate against the given
/// roots. Without it only the envelope signature is checked, which proves nothing about who
/// produced the BLOB.
pub fn verify_blob(
    blob: &str,
    trust: Option<(&dyn CertificateChainValidator, &[String])>,
) -> MdsResult<(MetadataBLOBPayload, Vec<SkippedEntry>)> {
    let jws = verify_compact(blob)?;
    check_blob_chain(&jws, trust)?;
    MetadataBLOBPayload::from_json_lenient(&jws.payload)
}

fn check_blob_chain(
    jws: &VerifiedJws,
    trust: Option<(&dyn CertificateChainValidator, &[String])>,
) -> MdsResult<()> {
    match trust {
        Some((validator, roots)) => validator.check(&jws.x5c_pem(), roots),
        None => {
            warn!("metadata blob chain validation is disabled");
            Ok(())
        }
    }
}

/// Index a payload by AAGUID. Returns the store and the number of entries that could not
/// be indexed.
pub fn index_payload(payload: MetadataBLOBPayload) -> (MetadataStore, usize) {
    let mut store = MetadataStore::new();
    let mut rejected = 0;

    for entry in payload.entries {
        let Some(aaguid) = entry.identifier.aaguid().map(str::to_string) else {
            trace!(identifier = ?entry.identifier, "entry is not identified by aaguid");
            continue;
        };

        if let Some(statement) = entry.metadata_statement {
            if statement.aaguid() != Some(aaguid.as_str()) {
                warn!(%aaguid, statement_aaguid = ?statement.aaguid(), "entry and statement aaguid differ, skipping");
                rejected += 1;
                continue;
            }
            store.insert_statement(statement);
        }
        store.insert_status_reports(&aaguid, entry.status_reports);
    }

    (store, rejected)
}

/// The BLOB envelope details of a loaded feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Serial number of the BLOB.
    pub no: u32,
    /// When the next BLOB will be published at latest.
    pub next_update: String,
    /// Legal header.
    pub legal_header: Option<String>,
}

#[derive(Debug)]
struct LoadedBlob {
    info: BlobInfo,
    store: Arc<MetadataStore>,
}

/// The metadata BLOB published by the FIDO Alliance, or a feed compatible with it. The
/// BLOB is fetched and verified on first use and kept for the life of the service.
#[derive(Debug)]
pub struct FidoAllianceCompliantMetadataService {
    uri: Url,
    headers: Vec<(String, String)>,
    root_certificate_uri: Option<Url>,
    chain_validator: Option<Arc<dyn CertificateChainValidator>>,
    client: Arc<dyn HttpClient>,
    cache: LoadOnce<LoadedBlob>,
    dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>,
}

/// Configures a [FidoAllianceCompliantMetadataService].
#[derive(Debug)]
pub struct FidoAllianceCompliantMetadataServiceBuilder {
    uri: Url,
    headers: Vec<(String, String)>,
    root_certificate_uri: Option<Url>,
    chain_validator: Option<Arc<dyn CertificateChainValidator>>,
    client: Option<Arc<dyn HttpClient>>,
    dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>,
}

impl FidoAllianceCompliantMetadataServiceBuilder {
    /// Fetch the BLOB from `uri`.
    pub fn new(uri: Url) -> Self {
        FidoAllianceCompliantMetadataServiceBuilder {
            uri,
            headers: Vec::new(),
            root_certificate_uri: None,
            chain_validator: None,
            client: None,
            dispatcher: Arc::new(NullEventDispatcher),
        }
    }

    /// Send `name: value` with the BLOB request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Fetch the trusted root of the BLOB signing chain from `uri`.
    pub fn root_certificate_uri(mut self, uri: Url) -> Self {
        self.root_certificate_uri = Some(uri);
        self
    }

    /// Validate the BLOB signing chain with `validator`.
    pub fn chain_validator(mut self, validator: Arc<dyn CertificateChainValidator>) -> Self {
        self.chain_validator = Some(validator);
        self
    }

    /// Perform requests with `client`. Defaults to [ReqwestHttpClient] with
    /// [DEFAULT_TIMEOUT].
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Report loads and lookups to `dispatcher`.
    pub fn event_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher<MetadataEvent>>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Complete the configuration.
    pub fn build(self) -> MdsResult<FidoAllianceCompliantMetadataService> {
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new(DEFAULT_TIMEOUT)?),
        };

        if self.root_certificate_uri.is_none() || self.chain_validator.is_none() {
            warn!(uri = %self.uri, "metadata blob chain validation is disabled, the blob will not be authenticated");
        }

        Ok(FidoAllianceCompliantMetadataService {
            uri: self.uri,
            headers: self.headers,
            root_certificate_uri: self.root_certificate_uri,
            chain_validator: self.chain_validator,
            client,
            cache: LoadOnce::new(),
            dispatcher: self.dispatcher,
        })
    }
}

impl FidoAllianceCompliantMetadataService {
    /// Start configuring a service that fetches the BLOB from `uri`.
    pub fn builder(uri: Url) -> FidoAllianceCompliantMetadataServiceBuilder {
        FidoAllianceCompliantMetadataServiceBuilder::new(uri)
    }

    /// The state of the load.
    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    /// The envelope details of the loaded BLOB, loading it if needed.
    pub fn blob_info(&self) -> MdsResult<BlobInfo> {
        self.loaded().map(|blob| blob.info.clone())
    }

    fn fetch_root(&self, root_uri: &Url) -> MdsResult<String> {
        let data = fetch(self.client.as_ref(), root_uri, &[])?;
        let root = load_certificate(&data)?;
        let pem = root.to_pem()?;
        String::from_utf8(pem).map_err(|_| MdsError::CertificateParse)
    }

    fn load(&self) -> MdsResult<Loaded<LoadedBlob>> {
        let body = fetch(self.client.as_ref(), &self.uri, &self.headers)?;
        let token = std::str::from_utf8(&body)
            .map_err(|_| MdsError::MalformedToken("blob is not utf-8"))?;

        // The root is only fetched for an envelope that verifies.
        let jws = verify_compact(token)?;
        match (&self.root_certificate_uri, &self.chain_validator) {
            (Some(root_uri), Some(validator)) => {
                let roots = [self.fetch_root(root_uri)?];
                check_blob_chain(&jws, Some((validator.as_ref(), &roots)))?;
            }
            _ => check_blob_chain(&jws, None)?,
        }
        let (payload, skipped) = MetadataBLOBPayload::from_json_lenient(&jws.payload)?;

        let info = BlobInfo {
            no: payload.no,
            next_update: payload.next_update.clone(),
            legal_header: payload.legal_header.clone(),
        };
        let (store, rejected) = index_payload(payload);
        let skipped = skipped.len() + rejected;

        info!(uri = %self.uri, no = info.no, statements = store.len(), ?skipped, "loaded metadata blob");

        Ok(Loaded {
            value: LoadedBlob {
                info,
                store: Arc::new(store),
            },
            skipped,
        })
    }

    fn loaded(&self) -> MdsResult<Arc<LoadedBlob>> {
        self.cache.get_or_load(|| match self.load() {
            Ok(loaded) => {
                self.dispatcher.dispatch(&MetadataEvent::Loaded {
                    source: self.uri.to_string(),
                    statements: loaded.value.store.len(),
                    skipped: loaded.skipped,
                });
                Ok(loaded)
            }
            Err(e) => {
                error!(uri = %self.uri, ?e, "unable to load metadata blob");
                self.dispatcher.dispatch(&MetadataEvent::LoadFailed {
                    source: self.uri.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        })
    }
}

impl MetadataService for FidoAllianceCompliantMetadataService {
    fn list(&self) -> MdsResult<AaguidIter> {
        self.loaded().map(|blob| AaguidIter::new(blob.store.clone()))
    }

    fn has(&self, aaguid: &str) -> MdsResult<bool> {
        Ok(self.loaded()?.store.has(aaguid))
    }

    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        let statement = self.loaded()?.store.get(aaguid)?;
        self.dispatcher.dispatch(&MetadataEvent::StatementFound {
            aaguid: aaguid.to_string(),
        });
        Ok(statement)
    }

    fn get_status_reports(&self, aaguid: &str) -> MdsResult<Vec<StatusReport>> {
        Ok(self.loaded()?.store.get_status_reports(aaguid))
    }
}
