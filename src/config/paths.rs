//! Canonical paths for vocadeck state.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `$VOCADECK_HOME/runs/<run_id>/` | Run journal and report |
//! | `$VOCADECK_STORE/index.jsonl` | Artifact index |
//! | `$VOCADECK_STORE/objects/` | Artifact bytes |

use std::path::PathBuf;

use anyhow::Result;

/// Get the artifact store directory (~/.vocadeck/store)
pub fn artifact_store() -> Result<PathBuf> {
    crate::config::store_dir()
}

/// Get the runs directory (~/.vocadeck/runs)
pub fn runs() -> Result<PathBuf> {
    crate::config::runs_dir()
}
