use super::local::decode_statement;
use super::{AaguidIter, MetadataService};
use crate::error::{MdsError, MdsResult};
use crate::model::{MetadataStatement, StatusReport};
use std::path::{Path, PathBuf};

/// A folder of statement files, each named by the AAGUID it describes. The folder is read
/// on every request, so files can be added or replaced while the service is running.
#[derive(Debug, Clone)]
pub struct FolderResourceMetadataService {
    root: PathBuf,
}

impl FolderResourceMetadataService {
    /// Serve the statements held in `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> MdsResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            error!(root = %root.display(), "metadata folder does not exist");
            return Err(MdsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "metadata folder does not exist",
            )));
        }
        Ok(FolderResourceMetadataService { root })
    }

    // Names must not escape the folder.
    fn path_for(&self, aaguid: &str) -> Option<PathBuf> {
        if aaguid.is_empty()
            || aaguid == "."
            || aaguid == ".."
            || aaguid.contains('/')
            || aaguid.contains('\\')
            || aaguid.contains('\0')
        {
            debug!(%aaguid, "rejecting metadata file name");
            return None;
        }
        Some(self.root.join(aaguid))
    }

    // A file is only served when it holds the statement of the AAGUID it is named by.
    fn statement_for(&self, aaguid: &str) -> MdsResult<Option<MetadataStatement>> {
        let Some(path) = self.path_for(aaguid).filter(|p| p.is_file()) else {
            return Ok(None);
        };
        let statement = decode_statement(&std::fs::read(path)?, false)?;
        if statement.aaguid() != Some(aaguid) {
            warn!(%aaguid, statement_aaguid = ?statement.aaguid(), "metadata file name and statement aaguid differ");
            return Ok(None);
        }
        Ok(Some(statement))
    }
}

impl MetadataService for FolderResourceMetadataService {
    fn list(&self) -> MdsResult<AaguidIter> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if self.has(&name)? => names.push(name),
                Ok(name) => debug!(%name, "ignoring file that is not a statement of its aaguid"),
                Err(name) => warn!(?name, "ignoring metadata file with a non utf-8 name"),
            }
        }
        Ok(AaguidIter::from_names(names))
    }

    fn has(&self, aaguid: &str) -> MdsResult<bool> {
        match self.statement_for(aaguid) {
            Ok(statement) => Ok(statement.is_some()),
            Err(MdsError::Io(e)) => Err(MdsError::Io(e)),
            Err(e) => {
                debug!(%aaguid, ?e, "metadata file does not decode");
                Ok(false)
            }
        }
    }

    fn get(&self, aaguid: &str) -> MdsResult<MetadataStatement> {
        self.statement_for(aaguid)?
            .ok_or_else(|| MdsError::NotFound(aaguid.to_string()))
    }

    fn get_status_reports(&self, _aaguid: &str) -> MdsResult<Vec<StatusReport>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::tests::statement_json;
    use crate::service::tests::assert_service_invariants;

    #[test]
    fn folder_get_returns_statement_unmodified() {
        let dir = tempfile::tempdir().expect("tmp");
        let aaguid = "2fc0579f-8113-47ea-b116-bb5a8db9202a";
        let json = statement_json(aaguid);
        std::fs::write(dir.path().join(aaguid), serde_json::to_vec(&json).expect("json"))
            .expect("write");
        std::fs::create_dir(dir.path().join("subdir")).expect("mkdir");

        let service = FolderResourceMetadataService::new(dir.path()).expect("service");
        let listed: Vec<String> = service.list().expect("list").collect();
        assert_eq!(listed, vec![aaguid.to_string()]);

        let stmt = service.get(aaguid).expect("get");
        let expected: MetadataStatement = serde_json::from_value(json).expect("decode");
        assert_eq!(stmt, expected);
        assert_service_invariants(&service);
        assert!(service.get_status_reports(aaguid).expect("reports").is_empty());
    }

    #[test]
    fn folder_rejects_escaping_names() {
        let dir = tempfile::tempdir().expect("tmp");
        let inner = dir.path().join("inner");
        std::fs::create_dir(&inner).expect("mkdir");
        std::fs::write(
            dir.path().join("outside"),
            serde_json::to_vec(&statement_json("outside")).expect("json"),
        )
        .expect("write");

        let service = FolderResourceMetadataService::new(&inner).expect("service");
        for name in ["../outside", "..", "", "subdir/x"] {
            assert!(!service.has(name).expect("has"));
            assert_eq!(
                service.get(name).expect_err("escape").kind(),
                ErrorKind::NotFound
            );
        }
    }

    #[test]
    fn folder_serves_only_statements_of_their_file_name() {
        let dir = tempfile::tempdir().expect("tmp");
        let aaguid = "2fc0579f-8113-47ea-b116-bb5a8db9202a";
        let other = "ee882879-721c-4913-9775-3dfcce97072a";
        let write = |name: &str, data: Vec<u8>| {
            std::fs::write(dir.path().join(name), data).expect("write");
        };
        write(aaguid, serde_json::to_vec(&statement_json(aaguid)).expect("json"));
        write(other, serde_json::to_vec(&statement_json(aaguid)).expect("json"));
        write("README", b"statements are named by aaguid".to_vec());

        let service = FolderResourceMetadataService::new(dir.path()).expect("service");
        let listed: Vec<String> = service.list().expect("list").collect();
        assert_eq!(listed, vec![aaguid.to_string()]);

        assert!(!service.has("README").expect("has"));
        assert!(!service.has(other).expect("has"));
        assert_eq!(
            service.get(other).expect_err("mismatch").kind(),
            ErrorKind::NotFound
        );
        // A file that is not a statement at all is reported as such.
        assert_ne!(service.get("README").expect_err("readme").kind(), ErrorKind::NotFound);
        assert_service_invariants(&service);
    }

    #[test]
    fn folder_must_exist() {
        let dir = tempfile::tempdir().expect("tmp");
        assert!(FolderResourceMetadataService::new(dir.path().join("missing")).is_err());
    }
}
