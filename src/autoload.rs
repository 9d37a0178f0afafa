//! Boot-time autoload declaration management.
//!
//! The declaration file lists one module name per line. Updates are purely
//! additive: lines this system does not own — other modules, comments,
//! blank lines — are preserved byte for byte and never reordered.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

/// Ensure every managed module is listed in the autoload declaration.
///
/// Creates the file (and parent directory) when absent. Returns `true`
/// when the file was modified; repeated calls with the same module set are
/// no-ops and never produce duplicate lines.
///
/// # Errors
///
/// Returns an error when the declaration cannot be read or written.
pub fn ensure_autoload(path: &Path, modules: &[String]) -> anyhow::Result<bool> {
    let existing = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read autoload file {}", path.display()))?
    } else {
        String::new()
    };

    let declared: Vec<&str> = existing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let missing: Vec<&String> = modules
        .iter()
        .filter(|module| !declared.contains(&module.as_str()))
        .collect();

    if missing.is_empty() {
        debug!(path = %path.display(), "all managed modules already declared for autoload");
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for module in &missing {
        updated.push_str(module);
        updated.push('\n');
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    std::fs::write(path, &updated)
        .with_context(|| format!("failed to write autoload file {}", path.display()))?;

    info!(
        path = %path.display(),
        added = missing.len(),
        "autoload declaration updated"
    );

    Ok(true)
}
