//! Signing identity: MOK key pair and self-signed certificate.
//!
//! The key and certificate are created together exactly once and never
//! regenerated while both exist — replacing them would invalidate the
//! trust relationship of an already-enrolled key. Key material is kept
//! root-only (directory 0700, files 0600).

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{HostPaths, IdentityConfig};
use crate::host;

/// Certificate validity in days (effectively the lifetime of the host).
const CERT_VALIDITY_DAYS: u32 = 36_500;

/// RSA key size accepted by the kernel's module signature verifier.
const KEY_BITS: u32 = 2048;

/// The on-disk signing identity: private key, DER certificate, and the
/// common name used both in the certificate subject and for matching
/// against the firmware's enrolled-key listing.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// PEM private key path.
    pub key_path: PathBuf,
    /// DER certificate path.
    pub cert_path: PathBuf,
    /// X.509 common name.
    pub common_name: String,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_path", &self.key_path)
            .field("cert_path", &self.cert_path)
            .field("common_name", &self.common_name)
            .finish()
    }
}

impl SigningIdentity {
    /// SHA-256 fingerprint of the DER certificate, colon-separated hex.
    ///
    /// Shown in enrollment instructions so the operator can verify the
    /// pending key inside the firmware MOK manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be read.
    pub fn fingerprint(&self) -> anyhow::Result<String> {
        let der = std::fs::read(&self.cert_path)
            .with_context(|| format!("failed to read certificate {}", self.cert_path.display()))?;

        let digest = Sha256::digest(&der);
        let hex = hex::encode_upper(digest);
        let pairs: Vec<&str> = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).unwrap_or(""))
            .collect();

        Ok(pairs.join(":"))
    }
}

/// Ensure the signing identity exists, creating it on first run.
///
/// When both key and certificate are present they are returned unchanged.
/// Otherwise a fresh RSA key pair and long-lived self-signed certificate
/// are generated via `openssl req` and written with owner-only permissions.
///
/// # Errors
///
/// Fatal when the key directory cannot be created root-only, when
/// `openssl` is missing while generation is required, or when generation
/// itself fails.
pub async fn ensure_identity(
    paths: &HostPaths,
    config: &IdentityConfig,
) -> anyhow::Result<SigningIdentity> {
    let identity = SigningIdentity {
        key_path: paths.key_file.clone(),
        cert_path: paths.cert_file.clone(),
        common_name: config.common_name.clone(),
    };

    let key_exists = identity.key_path.is_file();
    let cert_exists = identity.cert_path.is_file();

    if key_exists && cert_exists {
        debug!(
            key = %identity.key_path.display(),
            cert = %identity.cert_path.display(),
            "signing identity already present"
        );
        return Ok(identity);
    }

    if key_exists != cert_exists {
        // Half an identity cannot have been enrolled; regenerating the
        // pair is the only way back to a usable state.
        warn!(
            key_exists,
            cert_exists, "incomplete signing identity found, regenerating pair"
        );
    }

    anyhow::ensure!(
        host::tool_in_path("openssl"),
        "openssl is required to generate the signing identity but was not found on PATH"
    );

    let key_dir = identity
        .key_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("key path {} has no parent", identity.key_path.display()))?;

    std::fs::create_dir_all(key_dir)
        .with_context(|| format!("failed to create key directory {}", key_dir.display()))?;
    restrict_dir_permissions(key_dir)?;

    generate_key_pair(&identity).await?;

    enforce_private_file_permissions(&identity.key_path)?;
    enforce_private_file_permissions(&identity.cert_path)?;

    info!(
        cert = %identity.cert_path.display(),
        common_name = %identity.common_name,
        "signing identity generated"
    );

    Ok(identity)
}

/// Build the `openssl req` argument list for key-pair generation.
/// Exported for testing.
pub fn openssl_req_args(key: &Path, cert: &Path, common_name: &str) -> Vec<String> {
    vec![
        "req".to_owned(),
        "-new".to_owned(),
        "-x509".to_owned(),
        "-nodes".to_owned(),
        "-newkey".to_owned(),
        format!("rsa:{KEY_BITS}"),
        "-keyout".to_owned(),
        key.to_string_lossy().into_owned(),
        "-outform".to_owned(),
        "DER".to_owned(),
        "-out".to_owned(),
        cert.to_string_lossy().into_owned(),
        "-days".to_owned(),
        CERT_VALIDITY_DAYS.to_string(),
        "-subj".to_owned(),
        format!("/CN={common_name}/"),
    ]
}

/// Run `openssl req` to generate the key pair and certificate.
async fn generate_key_pair(identity: &SigningIdentity) -> anyhow::Result<()> {
    let args = openssl_req_args(
        &identity.key_path,
        &identity.cert_path,
        &identity.common_name,
    );

    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("openssl").args(&args).output()
    })
    .await
    .context("openssl task panicked")?
    .context("failed to run openssl req")?;

    if !output.status.success() {
        anyhow::bail!(
            "openssl req failed with exit code {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    anyhow::ensure!(
        identity.key_path.is_file() && identity.cert_path.is_file(),
        "openssl req reported success but key or certificate is missing"
    );

    Ok(())
}

/// Restrict the key directory to owner-only access (0700).
///
/// # Errors
///
/// Returns an error when permissions cannot be applied; key material must
/// never be group or world readable.
fn restrict_dir_permissions(dir: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)
            .with_context(|| format!("failed to restrict permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Set owner-only permissions (0600) on a key material file.
///
/// # Errors
///
/// Returns an error when permissions cannot be applied.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
