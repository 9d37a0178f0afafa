//! Kernel post-install hook rendering and atomic installation.
//!
//! The hook is a self-contained POSIX shell script at a fixed path under
//! the package manager's post-install directory. The package system invokes
//! it with the new kernel version as its first argument; with no argument
//! it falls back to the running kernel. It re-runs build → sign-all-kernels
//! → depmod → autoload → service refresh, and deliberately contains no
//! enrollment logic: automated runs must never block on a human.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::config::HostPaths;

/// Render the hook script for the given host paths and managed modules.
///
/// Pure and deterministic: rendering twice with the same inputs yields
/// identical bytes, which is what makes hook installation idempotent.
pub fn render_hook(paths: &HostPaths, modules: &[String]) -> String {
    let module_list = modules.join(" ");
    let key = paths.key_file.display();
    let cert = paths.cert_file.display();
    let modules_root = paths.modules_root.display();
    let headers_root = paths.headers_root.display();
    let autoload = paths.autoload_conf.display();

    format!(
        r#"#!/bin/sh
# Kernel post-install hook installed by moktrust. Regenerated on every
# moktrust run; do not edit. Rebuilds, signs, and registers the managed
# out-of-tree modules for newly installed kernels.

set -u

KVER="${{1:-$(uname -r)}}"
MODULES="{module_list}"
KEY="{key}"
CERT="{cert}"
MODULES_ROOT="{modules_root}"
HEADERS_ROOT="{headers_root}"
AUTOLOAD="{autoload}"

# Build for the new kernel. Best effort: dkms no-ops when current, and a
# kernel with no buildable artifacts is simply skipped by the sign loop.
if command -v dkms >/dev/null 2>&1; then
    dkms autoinstall -k "$KVER" || true
fi

# Sign managed modules for every installed kernel, not just the new one,
# then refresh that kernel's dependency index.
for DIR in "$MODULES_ROOT"/*; do
    [ -d "$DIR" ] || continue
    V="${{DIR##*/}}"
    SIGNER="$HEADERS_ROOT/linux-headers-$V/scripts/sign-file"
    [ -x "$SIGNER" ] || continue
    SIGNED=0
    for M in $MODULES; do
        KO="$DIR/updates/dkms/$M.ko"
        [ -f "$KO" ] || continue
        "$SIGNER" sha256 "$KEY" "$CERT" "$KO" || continue
        SIGNED=1
    done
    if [ "$SIGNED" = "1" ]; then
        depmod "$V" || true
    fi
done

# Keep managed modules in the boot autoload list. Append-only: lines not
# owned by moktrust are left untouched.
mkdir -p "${{AUTOLOAD%/*}}"
touch "$AUTOLOAD"
for M in $MODULES; do
    grep -qx "$M" "$AUTOLOAD" || printf '%s\n' "$M" >>"$AUTOLOAD"
done

# Best-effort refresh of services that depend on the modules.
systemctl restart NetworkManager >/dev/null 2>&1 || true
systemctl restart systemd-networkd >/dev/null 2>&1 || true
service network-manager restart >/dev/null 2>&1 || true
service networking restart >/dev/null 2>&1 || true

exit 0
"#
    )
}

/// Install the hook script atomically at `hook_path`.
///
/// Writes to a temporary file in the destination directory, marks it
/// executable, then renames into place — a partially written hook is never
/// left executable at the watched path. Repeated installs replace the file
/// with identical content.
///
/// # Errors
///
/// Returns an error when the destination directory cannot be created or
/// the write, chmod, or rename fails.
pub fn install_hook(hook_path: &Path, content: &str) -> anyhow::Result<()> {
    let dir = hook_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("hook path {} has no parent", hook_path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create hook directory {}", dir.display()))?;

    let file_name = hook_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("hook path {} has no file name", hook_path.display()))?;
    let staging = dir.join(format!(".{file_name}.tmp"));

    std::fs::write(&staging, content)
        .with_context(|| format!("failed to write staged hook {}", staging.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(&staging, perms)
            .with_context(|| format!("failed to mark {} executable", staging.display()))?;
    }

    std::fs::rename(&staging, hook_path).with_context(|| {
        format!(
            "failed to move hook into place at {}",
            hook_path.display()
        )
    })?;

    info!(path = %hook_path.display(), "update hook installed");

    Ok(())
}
