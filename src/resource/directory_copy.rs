//! Directory copy resource - push a local tree to a node
//!
//! The local side is walked once when the resource is declared. A remote
//! file is in sync when it exists with the same size and is not older than
//! the local file; only files out of sync are copied.

use converge::{ApplyContext, ReconcileError, Resource, ResourceState, Result, Session};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use super::ps_quote;

#[derive(Debug, Clone)]
struct LocalFile {
    /// Path below the source root, backslash separated
    relative: String,
    path: PathBuf,
    size: u64,
    modified: i64,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    path: String,
    size: u64,
    modified: i64,
}

#[derive(Debug, Clone)]
pub struct DirectoryCopy {
    pub source: PathBuf,
    /// Destination directory on the node
    pub destination: String,
    files: Vec<LocalFile>,
    bytes: u64,
    digest: String,
}

impl DirectoryCopy {
    /// Walk `source` and build the manifest to push to `destination`
    pub fn from_local(source: impl Into<PathBuf>, destination: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut files = Vec::new();

        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                ReconcileError::permanent(format!("cannot read {}: {e}", source.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| {
                ReconcileError::permanent(format!("cannot stat {}: {e}", entry.path().display()))
            })?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

            files.push(LocalFile {
                relative: windows_relative(&source, entry.path()),
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified,
            });
        }

        let bytes = files.iter().map(|f| f.size).sum();
        let digest = manifest_digest(files.iter());
        debug!(
            "{}: {} files, {bytes} bytes, manifest {digest}",
            source.display(),
            files.len()
        );

        Ok(Self {
            source,
            destination: destination.into(),
            files,
            bytes,
            digest,
        })
    }

    fn listing_script(&self) -> String {
        let dest = ps_quote(&self.destination);
        format!(
            "if (Test-Path -LiteralPath {dest}) {{\n\
             \x20   $root = (Resolve-Path -LiteralPath {dest}).ProviderPath.TrimEnd('\\') + '\\'\n\
             \x20   $files = @(Get-ChildItem -LiteralPath {dest} -Recurse -File | ForEach-Object {{ [pscustomobject]@{{ path = $_.FullName.Substring($root.Length); size = $_.Length; modified = ([DateTimeOffset]$_.LastWriteTimeUtc).ToUnixTimeSeconds() }} }})\n\
             \x20   ConvertTo-Json -InputObject $files -Compress\n\
             }}"
        )
    }

    /// Remote listing keyed by lowercase relative path, `None` when the
    /// destination does not exist
    fn remote_files(&self, session: &dyn Session) -> Result<Option<HashMap<String, RemoteFile>>> {
        let output = session.run_capture(&self.listing_script())?;
        let output = output.trim();
        if output.is_empty() {
            return Ok(None);
        }
        let listing: Vec<RemoteFile> = serde_json::from_str(output)?;
        Ok(Some(
            listing
                .into_iter()
                .map(|f| (f.path.to_lowercase(), f))
                .collect(),
        ))
    }

    fn out_of_sync<'a>(&'a self, remote: &HashMap<String, RemoteFile>) -> Vec<&'a LocalFile> {
        self.files
            .iter()
            .filter(|local| match remote.get(&local.relative.to_lowercase()) {
                Some(r) => r.size != local.size || r.modified < local.modified,
                None => true,
            })
            .collect()
    }

    fn remote_path(&self, relative: &str) -> String {
        format!("{}\\{relative}", self.destination.trim_end_matches('\\'))
    }
}

fn windows_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("\\")
}

fn manifest_digest<'a>(files: impl Iterator<Item = &'a LocalFile>) -> String {
    let mut hasher = blake3::Hasher::new();
    for file in files {
        hasher.update(file.relative.to_lowercase().as_bytes());
        hasher.update(b"\0");
        hasher.update(&file.size.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl Resource for DirectoryCopy {
    fn id(&self) -> String {
        format!("directory_copy:{}", self.destination)
    }

    fn description(&self) -> String {
        format!(
            "Copy {} to {} ({} files, {})",
            self.source.display(),
            self.destination,
            self.files.len(),
            crate::ui::format_size(self.bytes)
        )
    }

    fn resource_type(&self) -> &'static str {
        "directory_copy"
    }

    fn current_state(&self, session: &dyn Session) -> Result<ResourceState> {
        let Some(remote) = self.remote_files(session)? else {
            return Ok(ResourceState::Absent);
        };
        let stale = self.out_of_sync(&remote);
        let in_sync: Vec<&LocalFile> = self
            .files
            .iter()
            .filter(|f| !stale.iter().any(|s| s.relative == f.relative))
            .collect();

        Ok(ResourceState::present_with([
            ("files", in_sync.len().to_string()),
            ("bytes", in_sync.iter().map(|f| f.size).sum::<u64>().to_string()),
            ("manifest", manifest_digest(in_sync.into_iter())),
        ]))
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present_with([
            ("files", self.files.len().to_string()),
            ("bytes", self.bytes.to_string()),
            ("manifest", self.digest.clone()),
        ])
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<()> {
        let session = ctx.session;
        let Some(remote) = self.remote_files(session)? else {
            debug!("{}: {} missing, copying whole tree", ctx.node.name, self.destination);
            return session.copy_to(&self.source, &self.destination);
        };

        let stale = self.out_of_sync(&remote);
        debug!(
            "{}: {} of {} files out of sync under {}",
            ctx.node.name,
            stale.len(),
            self.files.len(),
            self.destination
        );
        for file in stale {
            session.copy_to(&file.path, &self.remote_path(&file.relative))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::testing::FakeSession;
    use converge::{CommandOutput, NodeRole, TargetNode};
    use std::fs;

    fn media() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("setup.exe"), b"MZ-setup").unwrap();
        fs::create_dir(dir.path().join("x64")).unwrap();
        fs::write(dir.path().join("x64").join("sqlservr.msi"), b"0123456789").unwrap();
        dir
    }

    fn listing(entries: &[(&str, u64, i64)]) -> CommandOutput {
        let files: Vec<serde_json::Value> = entries
            .iter()
            .map(|(path, size, modified)| {
                serde_json::json!({ "path": path, "size": size, "modified": modified })
            })
            .collect();
        CommandOutput::ok(serde_json::Value::Array(files).to_string())
    }

    #[test]
    fn test_manifest_from_local_walk() {
        let dir = media();
        let copy = DirectoryCopy::from_local(dir.path(), r"C:\SQLInstall").unwrap();
        let relatives: Vec<&str> = copy.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(relatives, vec!["setup.exe", r"x64\sqlservr.msi"]);
        assert_eq!(copy.bytes, 18);
    }

    #[test]
    fn test_missing_destination_copies_whole_tree() {
        let dir = media();
        let copy = DirectoryCopy::from_local(dir.path(), r"C:\SQLInstall").unwrap();
        let node = TargetNode::new("sql01", NodeRole::Primary);
        let session = FakeSession::new("sql01");

        assert_eq!(copy.current_state(&session).unwrap(), ResourceState::Absent);
        let mut ctx = ApplyContext::new(&node, &session, false, false);
        copy.apply(&mut ctx).unwrap();

        let copies = session.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0], (dir.path().to_path_buf(), r"C:\SQLInstall".to_string()));
    }

    #[test]
    fn test_only_stale_files_are_copied() {
        let dir = media();
        let copy = DirectoryCopy::from_local(dir.path(), r"C:\SQLInstall\").unwrap();
        let node = TargetNode::new("sql01", NodeRole::Primary);
        let session = FakeSession::new("sql01").respond(
            "Get-ChildItem",
            listing(&[("SETUP.EXE", 8, i64::MAX), (r"x64\sqlservr.msi", 4, i64::MAX)]),
        );

        assert!(copy.needs_apply(&session).unwrap());
        let mut ctx = ApplyContext::new(&node, &session, false, false);
        copy.apply(&mut ctx).unwrap();

        let copies = session.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1, r"C:\SQLInstall\x64\sqlservr.msi");
    }

    #[test]
    fn test_synced_tree_is_converged() {
        let dir = media();
        let copy = DirectoryCopy::from_local(dir.path(), r"C:\SQLInstall").unwrap();
        let session = FakeSession::new("sql01").respond(
            "Get-ChildItem",
            listing(&[
                ("setup.exe", 8, i64::MAX),
                (r"x64\sqlservr.msi", 10, i64::MAX),
                ("extra.log", 1, 0),
            ]),
        );
        assert!(!copy.needs_apply(&session).unwrap());
    }

    #[test]
    fn test_older_remote_file_is_stale() {
        let dir = media();
        let copy = DirectoryCopy::from_local(dir.path(), r"C:\SQLInstall").unwrap();
        let session = FakeSession::new("sql01").respond(
            "Get-ChildItem",
            listing(&[("setup.exe", 8, 0), (r"x64\sqlservr.msi", 10, i64::MAX)]),
        );
        assert!(copy.needs_apply(&session).unwrap());
    }
}
