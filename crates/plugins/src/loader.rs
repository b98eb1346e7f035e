//! Bundle discovery: scan the plugins directory for loadable bundles.
//!
//! The native bundle format is a directory containing `plugin.toml`.
//! Archive bundles (`.apk`, `.dex`, `.jar`) are recognized so they can be
//! reported, but this host has no in-process loader for foreign bytecode.

use std::path::{Path, PathBuf};

use crate::manifest::PluginManifest;

/// A discoverable plugin bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub dir: PathBuf,
    pub manifest: PluginManifest,
}

/// Result of scanning the plugins directory.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub bundles: Vec<Bundle>,
    /// Archive bundles present but not loadable on this host.
    pub unsupported: Vec<PathBuf>,
    /// Directories with a broken or missing manifest, with the reason.
    pub rejected: Vec<(PathBuf, String)>,
}

const ARCHIVE_EXTENSIONS: &[&str] = &["apk", "dex", "jar"];

/// Scan `plugins_dir` for bundles. A missing directory is an empty outcome,
/// not an error; a broken bundle is recorded and skipped.
pub fn scan_bundles(plugins_dir: &Path) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let entries = match std::fs::read_dir(plugins_dir) {
        Ok(e) => e,
        Err(_) => return outcome,
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_file() {
            let is_archive = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext));
            if is_archive {
                tracing::warn!(
                    bundle = %path.display(),
                    "archive plugin bundles are not loadable on this host"
                );
                outcome.unsupported.push(path);
            }
            continue;
        }
        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join("plugin.toml");
        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(c) => c,
            Err(_) => continue, // not a plugin directory
        };
        match PluginManifest::parse(&content) {
            Ok(manifest) => {
                tracing::debug!(
                    plugin_id = %manifest.id,
                    dir = %path.display(),
                    "discovered plugin bundle"
                );
                outcome.bundles.push(Bundle {
                    dir: path,
                    manifest,
                });
            }
            Err(reason) => {
                tracing::warn!(
                    dir = %path.display(),
                    error = %reason,
                    "skipping bundle with invalid plugin.toml"
                );
                outcome.rejected.push((path, reason));
            }
        }
    }

    outcome
        .bundles
        .sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plugin.toml"), manifest).unwrap();
    }

    #[test]
    fn scan_finds_valid_bundles_sorted_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(
            tmp.path(),
            "zzz",
            "id = \"aaa.plugin\"\nversion = \"1\"\ndisplay_name = \"A\"\nentry_point = \"a\"",
        );
        write_bundle(
            tmp.path(),
            "aaa",
            "id = \"zzz.plugin\"\nversion = \"1\"\ndisplay_name = \"Z\"\nentry_point = \"z\"",
        );
        let outcome = scan_bundles(tmp.path());
        let ids: Vec<&str> = outcome
            .bundles
            .iter()
            .map(|b| b.manifest.id.as_str())
            .collect();
        assert_eq!(ids, vec!["aaa.plugin", "zzz.plugin"]);
    }

    #[test]
    fn scan_records_archives_and_broken_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("legacy.apk"), b"PK").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();
        write_bundle(tmp.path(), "broken", "id = \"only an id\"");
        std::fs::create_dir_all(tmp.path().join("not-a-plugin")).unwrap();

        let outcome = scan_bundles(tmp.path());
        assert!(outcome.bundles.is_empty());
        assert_eq!(outcome.unsupported.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let outcome = scan_bundles(Path::new("/nonexistent/plugins"));
        assert!(outcome.bundles.is_empty());
        assert!(outcome.unsupported.is_empty());
    }
}
