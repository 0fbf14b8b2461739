// #![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

use clap::Parser;
use clap::{Args, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use webauthn_mds::{
    verify_blob, CertificateChainValidator, FidoAllianceCompliantMetadataService,
    FolderResourceMetadataService, LocalResourceMetadataService, MdsError, MdsResult,
    MetadataService, MetadataStatement, OpenSSLChainValidator, ReqwestHttpClient, StatusReport,
    FIDO_MDS_ROOT_CERTIFICATE_URL, FIDO_MDS_URL, GLOBAL_SIGN_ROOT_CA_R3,
};

#[derive(Debug, Args)]
pub struct CommonOpt {
    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,
}

#[derive(Debug, Args)]
pub struct VerifyOpt {
    #[clap(flatten)]
    pub common: CommonOpt,
    /// Path to the metadata BLOB
    #[clap(short = 'p', long = "path")]
    pub path: PathBuf,
    /// PEM file of the root the BLOB must chain to. Defaults to the GlobalSign Root CA R3.
    #[clap(short = 'r', long = "root")]
    pub root: Option<PathBuf>,
    /// Only check the envelope signature, not the certificate chain
    #[clap(long = "no-chain-check")]
    pub no_chain_check: bool,
}

#[derive(Debug, Args)]
pub struct FetchOpt {
    #[clap(flatten)]
    pub common: CommonOpt,
    /// The metadata BLOB feed
    #[clap(long = "url", env = "WEBAUTHN_MDS_URL", default_value = FIDO_MDS_URL)]
    pub url: Url,
    /// The root certificate the feed must chain to
    #[clap(
        long = "root-url",
        env = "WEBAUTHN_MDS_ROOT_URL",
        default_value = FIDO_MDS_ROOT_CERTIFICATE_URL
    )]
    pub root_url: Url,
    /// Request timeout in seconds
    #[clap(long = "timeout", default_value_t = 30)]
    pub timeout: u64,
    /// Display the statement of this AAGUID, rather than the list of AAGUIDs
    #[clap(short = 'a', long = "aaguid")]
    pub aaguid: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectOpt {
    #[clap(flatten)]
    pub common: CommonOpt,
    /// Path to the metadata statement
    #[clap(short = 'p', long = "path")]
    pub path: PathBuf,
    /// The file content is base64 encoded JSON
    #[clap(short = 'b', long = "base64")]
    pub base64: bool,
}

#[derive(Debug, Args)]
pub struct ListOpt {
    #[clap(flatten)]
    pub common: CommonOpt,
    /// Folder of metadata statements, each named by its AAGUID
    #[clap(short = 'p', long = "path")]
    pub path: PathBuf,
    /// Display the statement of this AAGUID, rather than the list of AAGUIDs
    #[clap(short = 'a', long = "aaguid")]
    pub aaguid: Option<String>,
}

#[derive(Debug, Subcommand)]
#[clap(about = "Fido Metadata Service query tool")]
pub enum Opt {
    /// Verify a metadata BLOB file and summarise its content
    Verify(VerifyOpt),
    /// Download and verify a metadata BLOB feed
    Fetch(FetchOpt),
    /// Parse and display a single metadata statement file
    Inspect(InspectOpt),
    /// List a folder of metadata statements
    List(ListOpt),
}

impl Opt {
    fn debug(&self) -> bool {
        match self {
            Opt::Verify(VerifyOpt { common, .. })
            | Opt::Fetch(FetchOpt { common, .. })
            | Opt::Inspect(InspectOpt { common, .. })
            | Opt::List(ListOpt { common, .. }) => common.debug,
        }
    }
}

#[derive(Debug, clap::Parser)]
#[clap(about = "Fido Metadata Service query tool")]
pub struct CliParser {
    #[clap(subcommand)]
    pub commands: Opt,
}

/// Accept AAGUIDs with or without hyphens, in either case.
fn normalise_aaguid(input: &str) -> MdsResult<String> {
    let compact: String = input.chars().filter(|c| *c != '-').collect();
    let bytes = hex::decode(&compact)
        .ok()
        .filter(|b| b.len() == 16)
        .ok_or(MdsError::InvalidIdentifier("aaguid must be 16 hex encoded bytes"))?;
    let h = hex::encode(bytes);
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    ))
}

fn current_status(reports: &[StatusReport]) -> String {
    reports
        .last()
        .map(|r| format!("{:?}", r.status))
        .unwrap_or_else(|| "-".to_string())
}

fn display_statement(statement: &MetadataStatement, reports: &[StatusReport]) {
    println!("{}", statement);
    for report in reports {
        println!(
            "status: {:?} since {}",
            report.status,
            report.effective_date.as_deref().unwrap_or("-")
        );
    }
}

fn summarise(service: &dyn MetadataService, aaguid: Option<&str>) -> MdsResult<()> {
    if let Some(aaguid) = aaguid {
        let statement = service.get(aaguid)?;
        let reports = service.get_status_reports(aaguid)?;
        display_statement(&statement, &reports);
        return Ok(());
    }

    let mut count = 0;
    for aaguid in service.list()? {
        let statement = service.get(&aaguid)?;
        let reports = service.get_status_reports(&aaguid)?;
        println!(
            "{}  {:<24}  {}",
            aaguid,
            current_status(&reports),
            statement.description
        );
        count += 1;
    }
    println!("{} statements", count);
    Ok(())
}

fn verify(opt: &VerifyOpt) -> MdsResult<()> {
    tracing::trace!(path = ?opt.path);
    let blob = fs::read_to_string(&opt.path)?;

    let validator = OpenSSLChainValidator::new();
    let roots = match &opt.root {
        Some(root) => vec![fs::read_to_string(root)?],
        None => vec![GLOBAL_SIGN_ROOT_CA_R3.to_string()],
    };
    let trust = if opt.no_chain_check {
        None
    } else {
        let validator: &dyn CertificateChainValidator = &validator;
        Some((validator, roots.as_slice()))
    };

    let (payload, skipped) = verify_blob(blob.trim(), trust)?;

    println!("no: {}", payload.no);
    println!("next update: {}", payload.next_update);
    if let Some(legal_header) = &payload.legal_header {
        println!("legal header: {}", legal_header);
    }
    println!("entries: {}", payload.entries.len());
    for entry in &skipped {
        tracing::warn!(index = entry.index, reason = %entry.reason, "skipped entry");
    }
    println!("skipped: {}", skipped.len());
    Ok(())
}

fn fetch(opt: &FetchOpt) -> MdsResult<()> {
    let client = ReqwestHttpClient::new(Duration::from_secs(opt.timeout))?;
    let service = FidoAllianceCompliantMetadataService::builder(opt.url.clone())
        .root_certificate_uri(opt.root_url.clone())
        .chain_validator(Arc::new(OpenSSLChainValidator::new()))
        .http_client(Arc::new(client))
        .build()?;

    let info = service.blob_info()?;
    println!("no: {}", info.no);
    println!("next update: {}", info.next_update);
    tracing::debug!(status = ?service.status());

    let aaguid = opt.aaguid.as_deref().map(normalise_aaguid).transpose()?;
    summarise(&service, aaguid.as_deref())
}

fn inspect(opt: &InspectOpt) -> MdsResult<()> {
    let service = LocalResourceMetadataService::new(&opt.path, opt.base64);
    summarise(&service, None)?;
    tracing::debug!(status = ?service.status());
    Ok(())
}

fn list(opt: &ListOpt) -> MdsResult<()> {
    let service = FolderResourceMetadataService::new(&opt.path)?;
    // File names are used as is, so they are not normalised.
    summarise(&service, opt.aaguid.as_deref())
}

fn main() {
    let opt = CliParser::parse();

    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    let filter_layer = if opt.commands.debug() {
        match EnvFilter::try_new("webauthn_mds=debug,webauthn_mds_tool=debug") {
            Ok(f) => f,
            Err(e) => {
                eprintln!("ERROR! Unable to start tracing {:?}", e);
                return;
            }
        }
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(f) => f,
            Err(_) => EnvFilter::new("webauthn_mds=warn,webauthn_mds_tool=warn"),
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let result = match &opt.commands {
        Opt::Verify(opt) => verify(opt),
        Opt::Fetch(opt) => fetch(opt),
        Opt::Inspect(opt) => inspect(opt),
        Opt::List(opt) => list(opt),
    };

    if let Err(e) = result {
        tracing::error!(?e, "{}", e);
        std::process::exit(1);
    }
}
