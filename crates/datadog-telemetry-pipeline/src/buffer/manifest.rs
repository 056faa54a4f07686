// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffer manifest: the durable consumption offset.
//!
//! The manifest records how far delivery has progressed (`consumed`) and the
//! next global append index, so crash recovery knows which persisted records
//! are still pending. Segment order itself is derived from the zero-padded
//! file names, not from the manifest, which keeps the manifest a tiny file
//! that is rewritten atomically (temp file + rename).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct Manifest {
    /// Events with a global index below this are resolved (delivered,
    /// dropped, or evicted) and must not resurrect after a restart.
    pub(crate) consumed: u64,
    /// Global index assigned to the next appended event.
    pub(crate) next_index: u64,
}

impl Manifest {
    /// Loads the manifest, falling back to an empty one when the file is
    /// missing or unreadable. A corrupt manifest never crashes the host; it
    /// only risks re-sending already-delivered events.
    pub(crate) fn load(dir: &Path) -> Self {
        let path = dir.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(manifest = %path.display(), error = %e, "corrupt manifest, starting from offset 0");
                    Manifest::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => {
                warn!(manifest = %path.display(), error = %e, "unreadable manifest, starting from offset 0");
                Manifest::default()
            }
        }
    }

    /// Atomically rewrites the manifest.
    pub(crate) fn store(&self, dir: &Path) -> Result<(), PipelineError> {
        let tmp = dir.join(MANIFEST_TMP_FILE);
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_manifest_defaults_to_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::load(dir.path());
        assert_eq!(manifest.consumed, 0);
        assert_eq!(manifest.next_index, 0);
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest {
            consumed: 7,
            next_index: 42,
        };
        manifest.store(dir.path()).expect("store");

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.consumed, 7);
        assert_eq!(loaded.next_index, 42);
    }

    #[test]
    fn test_corrupt_manifest_falls_back_to_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(MANIFEST_FILE), b"not json at all").expect("write");

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.consumed, 0);
    }

    #[test]
    fn test_store_overwrites_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        Manifest {
            consumed: 1,
            next_index: 2,
        }
        .store(dir.path())
        .expect("store");
        Manifest {
            consumed: 5,
            next_index: 9,
        }
        .store(dir.path())
        .expect("store again");

        let loaded = Manifest::load(dir.path());
        assert_eq!(loaded.consumed, 5);
        assert_eq!(loaded.next_index, 9);
    }
}
