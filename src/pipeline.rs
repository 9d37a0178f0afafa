//! Build / verify / sign / depmod / load reconciliation pipeline.
//!
//! Every step is idempotent so repeated runs converge: dkms no-ops when
//! artifacts are current, re-signing replaces the embedded signature, and
//! depmod regenerates the same index. Signing always covers every installed
//! kernel, not just the target, so older kernels never silently lose a
//! valid signature chain.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::HostPaths;
use crate::host;
use crate::identity::SigningIdentity;

/// Digest algorithm passed to the kernel's `sign-file` tool.
const SIGNATURE_DIGEST: &str = "sha256";

/// Pipeline integrity failures that abort one kernel's reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A managed artifact is absent after the build step. Signing and
    /// registering a subset would leave the host half-working, so the
    /// whole kernel version fails instead.
    #[error("managed module '{module}' missing for kernel {kver} (expected at {path})")]
    MissingArtifact {
        /// Module name from the managed set.
        module: String,
        /// Kernel version whose reconciliation failed.
        kver: String,
        /// Expected artifact location.
        path: std::path::PathBuf,
    },
}

/// Reconcile the managed modules for `target_kver`.
///
/// Builds for the target kernel, hard-fails if any managed artifact is
/// still missing, signs artifacts across every installed kernel, refreshes
/// each signed kernel's dependency index, and loads the modules when the
/// target is the running kernel.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingArtifact`] when the build left a
/// managed artifact absent, or an error when kernel enumeration fails.
pub async fn reconcile(
    paths: &HostPaths,
    identity: &SigningIdentity,
    modules: &[String],
    target_kver: &str,
) -> anyhow::Result<()> {
    info!(kver = %target_kver, "reconciling managed modules");

    build_modules(target_kver).await;

    verify_artifacts(&paths.modules_root, target_kver, modules)?;

    let kernels = host::installed_kernels(&paths.modules_root)
        .context("failed to enumerate installed kernels")?;
    info!(count = kernels.len(), "signing across installed kernels");

    for kver in &kernels {
        let signed = sign_kernel(identity, paths, kver, modules).await;
        if signed > 0 {
            refresh_depmod(kver).await;
        }
    }

    match host::running_kernel().await {
        Ok(running) if running == target_kver => {
            load_modules(modules).await;
        }
        Ok(running) => {
            debug!(
                running = %running,
                target = %target_kver,
                "target is not the running kernel, skipping module load"
            );
        }
        Err(e) => {
            warn!(error = %e, "could not determine running kernel, skipping module load");
        }
    }

    Ok(())
}

/// Invoke the external build capability for one kernel version.
///
/// Best effort: dkms legitimately no-ops when artifacts are current, and
/// its failures surface later as missing artifacts anyway. A missing dkms
/// binary is tolerated the same way.
pub async fn build_modules(kver: &str) {
    if !host::tool_in_path("dkms") {
        warn!("dkms not found on PATH, skipping module build");
        return;
    }

    let kver_owned = kver.to_owned();
    info!(kver = %kver, "building modules via dkms");

    let result = tokio::task::spawn_blocking(move || {
        std::process::Command::new("dkms")
            .args(["autoinstall", "-k", &kver_owned])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
    })
    .await;

    match result {
        Ok(Ok(status)) if status.success() => {
            info!(kver = %kver, "dkms autoinstall completed");
        }
        Ok(Ok(status)) => {
            warn!(
                kver = %kver,
                exit_code = ?status.code(),
                "dkms autoinstall returned non-zero (artifacts may already be current)"
            );
        }
        Ok(Err(e)) => {
            warn!(error = %e, "failed to run dkms autoinstall");
        }
        Err(e) => {
            warn!(error = %e, "dkms autoinstall task panicked");
        }
    }
}

/// Verify every managed artifact exists for `kver`.
///
/// Hardened policy: a missing artifact fails the whole kernel version.
/// Copying stray build outputs from temporary directories into the
/// privileged load path is deliberately not attempted.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingArtifact`] for the first absent module.
pub fn verify_artifacts(
    modules_root: &Path,
    kver: &str,
    modules: &[String],
) -> Result<(), ReconcileError> {
    for module in modules {
        let path = host::artifact_path(modules_root, kver, module);
        if !path.is_file() {
            return Err(ReconcileError::MissingArtifact {
                module: module.clone(),
                kver: kver.to_owned(),
                path,
            });
        }
    }
    Ok(())
}

/// Sign the managed artifacts present under one kernel's module tree.
///
/// Skips the whole kernel when its signer tool is absent (older kernels
/// may lack installed headers) and skips absent artifacts. Per-artifact
/// signing failures are logged and skipped; re-signing an already-signed
/// artifact is safe, the loader uses the last valid signature. Returns the
/// number of artifacts signed.
pub async fn sign_kernel(
    identity: &SigningIdentity,
    paths: &HostPaths,
    kver: &str,
    modules: &[String],
) -> usize {
    let signer = host::signer_path(&paths.headers_root, kver);
    if !signer.is_file() {
        debug!(kver = %kver, signer = %signer.display(), "no signer for kernel, skipping");
        return 0;
    }

    let mut signed: usize = 0;
    for module in modules {
        let artifact = host::artifact_path(&paths.modules_root, kver, module);
        if !artifact.is_file() {
            debug!(kver = %kver, module = %module, "artifact absent, skipping signature");
            continue;
        }

        let signer_owned = signer.clone();
        let key = identity.key_path.clone();
        let cert = identity.cert_path.clone();
        let artifact_owned = artifact.clone();

        let result = tokio::task::spawn_blocking(move || {
            std::process::Command::new(&signer_owned)
                .arg(SIGNATURE_DIGEST)
                .arg(&key)
                .arg(&cert)
                .arg(&artifact_owned)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
        })
        .await;

        match result {
            Ok(Ok(status)) if status.success() => {
                info!(kver = %kver, module = %module, "module signed");
                signed = signed.saturating_add(1);
            }
            Ok(Ok(status)) => {
                warn!(
                    kver = %kver,
                    module = %module,
                    exit_code = ?status.code(),
                    "sign-file returned non-zero, continuing"
                );
            }
            Ok(Err(e)) => {
                warn!(error = %e, kver = %kver, module = %module, "failed to run sign-file");
            }
            Err(e) => {
                warn!(error = %e, "sign-file task panicked");
            }
        }
    }

    signed
}

/// Refresh one kernel's module dependency index so loader metadata matches
/// the freshly signed files. Tolerated on failure.
pub async fn refresh_depmod(kver: &str) {
    let kver_owned = kver.to_owned();
    debug!(kver = %kver, "refreshing module dependency index");

    let result = tokio::task::spawn_blocking(move || {
        std::process::Command::new("depmod")
            .arg(&kver_owned)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
    })
    .await;

    match result {
        Ok(Ok(status)) if status.success() => {
            debug!(kver = %kver, "depmod completed");
        }
        Ok(Ok(status)) => {
            warn!(kver = %kver, exit_code = ?status.code(), "depmod returned non-zero");
        }
        Ok(Err(e)) => {
            warn!(error = %e, kver = %kver, "failed to run depmod");
        }
        Err(e) => {
            warn!(error = %e, "depmod task panicked");
        }
    }
}

/// Attempt to load each managed module into the running kernel.
///
/// Tolerated on failure so the operator can diagnose before rebooting —
/// the loader may still hold an old unsigned copy, or enforcement may
/// reject a module signed moments ago under a not-yet-effective key.
pub async fn load_modules(modules: &[String]) {
    for module in modules {
        let module_owned = module.clone();

        let result = tokio::task::spawn_blocking(move || {
            std::process::Command::new("modprobe")
                .arg(&module_owned)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
        })
        .await;

        match result {
            Ok(Ok(status)) if status.success() => {
                info!(module = %module, "module loaded");
            }
            Ok(Ok(status)) => {
                warn!(
                    module = %module,
                    exit_code = ?status.code(),
                    "modprobe failed (a reboot may be required)"
                );
            }
            Ok(Err(e)) => {
                warn!(error = %e, module = %module, "failed to run modprobe");
            }
            Err(e) => {
                warn!(error = %e, "modprobe task panicked");
            }
        }
    }
}
