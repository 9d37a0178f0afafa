//! Host probes: privilege check, running kernel, installed kernel trees,
//! and external tool lookup.
//!
//! Everything here observes host state without mutating it. Kernel version
//! discovery scopes the signing step so every installed kernel — not just
//! the running one — keeps working artifacts.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

/// Returns `true` when the process runs with effective uid 0.
///
/// Reads the ownership of `/proc/self`, which the kernel assigns from the
/// process's effective uid. On non-Linux hosts this reports `false`; the
/// orchestrator only targets Linux.
pub fn running_as_root() -> bool {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::MetadataExt;

        match std::fs::metadata("/proc/self") {
            Ok(meta) => meta.uid() == 0,
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Returns `true` when `name` resolves to an executable file on `PATH`.
pub fn tool_in_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };

    std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file())
}

/// Report the running kernel version via `uname -r`.
///
/// # Errors
///
/// Returns an error if `uname` cannot be spawned or exits non-zero.
pub async fn running_kernel() -> anyhow::Result<String> {
    let output = tokio::task::spawn_blocking(|| {
        std::process::Command::new("uname").arg("-r").output()
    })
    .await
    .context("uname task panicked")?
    .context("failed to run uname -r")?;

    anyhow::ensure!(
        output.status.success(),
        "uname -r failed with exit code {:?}",
        output.status.code()
    );

    let version = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    anyhow::ensure!(!version.is_empty(), "uname -r produced no output");

    Ok(version)
}

/// Enumerate kernel versions with a module tree under `modules_root`.
///
/// A directory counts as a kernel tree when it holds a `kernel/` subtree or
/// a `modules.dep` index; stray files and unrelated directories are skipped.
/// Result is sorted for stable iteration order.
///
/// # Errors
///
/// Returns an error if `modules_root` cannot be read.
pub fn installed_kernels(modules_root: &Path) -> anyhow::Result<Vec<String>> {
    let entries = std::fs::read_dir(modules_root)
        .with_context(|| format!("failed to read module root {}", modules_root.display()))?;

    let mut kernels = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", modules_root.display()))?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }
        if !path.join("kernel").is_dir() && !path.join("modules.dep").is_file() {
            debug!(path = %path.display(), "skipping non-kernel directory");
            continue;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            kernels.push(name.to_owned());
        }
    }

    kernels.sort();
    Ok(kernels)
}

/// Expected on-disk path of a managed module artifact for one kernel.
pub fn artifact_path(modules_root: &Path, kver: &str, module: &str) -> PathBuf {
    modules_root
        .join(kver)
        .join("updates/dkms")
        .join(format!("{module}.ko"))
}

/// Per-kernel module signer tool shipped with that kernel's headers.
/// Absence is tolerated by the pipeline (older kernels may lack headers).
pub fn signer_path(headers_root: &Path, kver: &str) -> PathBuf {
    headers_root
        .join(format!("linux-headers-{kver}"))
        .join("scripts/sign-file")
}
