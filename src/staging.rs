// src/staging.rs
//
// =============================================================================
// SANDRUNNER: FILE STAGING (C7)
// =============================================================================
//
// Builds the ephemeral host-side scratch directory holding the two
// generated harness files, then packs it into a single tar stream with one
// root entry so it uploads cleanly via `SandboxSession::upload`. The scratch
// directory is removed the moment the `StagedTree` is dropped.
//
// Grounded on `src/provenance.rs`'s `ArtifactStore`: same guaranteed-cleanup
// scratch-lifetime discipline, adapted from a content-addressable commit
// store to a one-shot per-submission scratch tree. Crates: `tempfile`, `tar`.

use crate::model::Artefact;
use anyhow::{Context, Result};
use tempfile::TempDir;

/// A host-side scratch directory holding the staged artefacts. Dropping this
/// removes the directory (via `TempDir`'s own `Drop`), so a session never
/// needs to remember to clean it up.
pub struct StagedTree {
    dir: TempDir,
}

impl StagedTree {
    /// Materialises both harness artefacts under a fresh scratch directory.
    pub fn new(artefacts: &[Artefact]) -> Result<Self> {
        let dir = TempDir::new().context("failed to create staging scratch directory")?;
        for artefact in artefacts {
            let path = dir.path().join(artefact.filename());
            std::fs::write(&path, artefact.contents())
                .with_context(|| format!("failed to write staged artefact {path:?}"))?;
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Packs the scratch directory into a tar byte stream with a single `.`
    /// root entry, matching the original's `_create_tar_from_directory`
    /// (`tar.add(src_dir, arcname=".")`) so the upload lands flat in the
    /// container's mount directory rather than nested under the scratch
    /// dir's own name.
    pub fn to_tar(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut bytes);
            builder
                .append_dir_all(".", self.dir.path())
                .context("failed to pack staged tree into tar stream")?;
            builder.finish().context("failed to finalize tar stream")?;
        }
        Ok(bytes)
    }
}

/// Packs one small text file into a single-entry tar stream, for artefacts
/// that don't warrant a full `StagedTree` (the whitelist resolver's
/// generator script).
pub fn pack_single_file(filename: &str, contents: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut bytes);
        let data = contents.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, filename, data)
            .context("failed to pack single-file tar stream")?;
        builder.finish().context("failed to finalize tar stream")?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_both_artefacts_to_disk() {
        let artefacts = vec![
            Artefact::SubjectHarness("print('subject')".to_string()),
            Artefact::DriverHarness("print('driver')".to_string()),
        ];
        let staged = StagedTree::new(&artefacts).unwrap();
        assert!(staged.path().join("main.py").exists());
        assert!(staged.path().join("test_script.py").exists());
    }

    #[test]
    fn tar_stream_is_nonempty_and_contains_entries() {
        let artefacts = vec![Artefact::SubjectHarness("x = 1".to_string())];
        let staged = StagedTree::new(&artefacts).unwrap();
        let tar_bytes = staged.to_tar().unwrap();
        assert!(!tar_bytes.is_empty());

        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("main.py")));
    }

    #[test]
    fn pack_single_file_round_trips() {
        let tar_bytes = pack_single_file("generate_allowed_modules.py", "print(1)").unwrap();
        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        assert_eq!(path, "generate_allowed_modules.py");
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut entry, &mut contents).unwrap();
        assert_eq!(contents, "print(1)");
    }
}
