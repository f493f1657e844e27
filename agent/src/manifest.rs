//! Script allow-list ("Script manifest", §4.8 step 2).
//!
//! Grounded on `examples/original_source/internal/runner/manifest.go`'s
//! `Manifest`/`LoadManifest`/`Lookup`/`SHA256File`, with the relative-path
//! resolution simplified to "relative to the manifest file's directory"
//! (the Go reference's `filepath.Join(filepath.Dir(path), "..", s.Path)`
//! bakes in an extra `..` specific to its repo layout that this crate does
//! not reproduce).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::crypto::sha256_hex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawManifest {
    scripts: Vec<ScriptEntry>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    index: HashMap<String, ScriptEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let raw: RawManifest =
            serde_json::from_slice(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut index = HashMap::with_capacity(raw.scripts.len());
        for mut entry in raw.scripts {
            if entry.path.is_relative() {
                entry.path = base_dir.join(&entry.path);
            }
            index.insert(entry.name.clone(), entry);
        }
        Ok(Self { index })
    }

    pub fn lookup(&self, name: &str) -> Option<&ScriptEntry> {
        self.index.get(name)
    }
}

/// Lowercase-hex SHA-256 of a file's bytes.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("scripts/check_uptime.sh"), b"#!/bin/bash\nuptime\n").unwrap();
        let hash = sha256_file(&dir.path().join("scripts/check_uptime.sh")).unwrap();

        let manifest_json = serde_json::json!({
            "scripts": [{"name": "check_uptime", "path": "scripts/check_uptime.sh", "sha256": hash}]
        });
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, manifest_json.to_string()).unwrap();

        let manifest = Manifest::load(&manifest_path).unwrap();
        let entry = manifest.lookup("check_uptime").expect("entry present");
        assert_eq!(entry.path, dir.path().join("scripts/check_uptime.sh"));
        assert_eq!(entry.sha256, hash);
        assert!(manifest.lookup("nonexistent").is_none());
    }

    #[test]
    fn sha256_file_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, b"echo hi\n").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_file(&path).unwrap());
    }
}
