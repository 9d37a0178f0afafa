//! Firmware trust probing and MOK enrollment.
//!
//! Trust state is derived fresh on every run from `mokutil`; nothing is
//! cached. Detection of an already-enrolled key matches the certificate's
//! common name against the enrolled-key listing — the firmware exposes no
//! stable identifier we control, so this is a documented heuristic: a
//! certificate regenerated under the same name would be misreported as
//! enrolled.

use std::process::Stdio;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::identity::SigningIdentity;

/// Firmware trust phase observed at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    /// Secure Boot enforcement is off (or the platform has no EFI
    /// variables). Signing stays configured for forward compatibility but
    /// the pipeline is not gated on enrollment.
    Disabled,
    /// Secure Boot is enforcing and our key is not in the trust store.
    EnabledUnenrolled,
    /// Secure Boot is enforcing and a key matching our common name is
    /// enrolled.
    EnabledEnrolled,
}

/// Classify the current trust phase for the given certificate common name.
///
/// # Errors
///
/// Returns an error if `mokutil` cannot be spawned or the enrolled-key
/// listing cannot be read while Secure Boot is enabled.
pub async fn probe(common_name: &str) -> anyhow::Result<TrustState> {
    let sb_output = run_mokutil(&["--sb-state"]).await?;

    match parse_sb_state(&sb_output) {
        Some(true) => {}
        Some(false) => {
            info!("secure boot is disabled");
            return Ok(TrustState::Disabled);
        }
        None => {
            // Legacy BIOS hosts and VMs without EFI variables land here.
            warn!(
                output = %sb_output.trim(),
                "mokutil could not report secure boot state, treating as disabled"
            );
            return Ok(TrustState::Disabled);
        }
    }

    let enrolled = run_mokutil(&["--list-enrolled"])
        .await
        .context("failed to read enrolled key list")?;

    if enrolled_list_contains(&enrolled, common_name) {
        debug!(common_name, "matching key found in enrolled list");
        Ok(TrustState::EnabledEnrolled)
    } else {
        debug!(common_name, "no matching key in enrolled list");
        Ok(TrustState::EnabledUnenrolled)
    }
}

/// Returns `true` when a key with our common name is already sitting in the
/// pending-enrollment queue, so repeat runs while awaiting the reboot do
/// not re-import. Failures are tolerated (the queue may be empty, which
/// mokutil reports with a non-zero exit).
pub async fn is_enrollment_pending(identity: &SigningIdentity) -> bool {
    match run_mokutil(&["--list-new"]).await {
        Ok(listing) => enrolled_list_contains(&listing, &identity.common_name),
        Err(e) => {
            debug!(error = %e, "could not read pending enrollment queue");
            false
        }
    }
}

/// Submit the certificate to the firmware's pending-enrollment queue.
///
/// Runs `mokutil --import` with inherited stdio: the operator chooses the
/// one-time enrollment password here and re-enters it exactly once, in the
/// firmware MOK manager after reboot. Resubmission of an already-pending
/// certificate is harmless.
///
/// # Errors
///
/// Returns an error if the import command cannot be spawned or exits
/// non-zero.
pub async fn submit_enrollment(identity: &SigningIdentity) -> anyhow::Result<()> {
    let cert = identity.cert_path.to_string_lossy().into_owned();
    info!(cert = %cert, "submitting certificate for MOK enrollment");

    let status = tokio::task::spawn_blocking(move || {
        std::process::Command::new("mokutil")
            .args(["--import", &cert])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
    })
    .await
    .context("mokutil import task panicked")?
    .context("failed to run mokutil --import")?;

    anyhow::ensure!(
        status.success(),
        "mokutil --import failed with exit code {:?}",
        status.code()
    );

    Ok(())
}

/// Print the operator walkthrough for completing enrollment.
///
/// Enrollment cannot be completed from user space: the firmware asks for
/// confirmation at the next boot. The pipeline therefore stops here and
/// converges on the next invocation after the reboot.
///
/// # Errors
///
/// Returns an error if the certificate fingerprint cannot be computed.
pub fn print_enrollment_instructions(identity: &SigningIdentity) -> anyhow::Result<()> {
    let fingerprint = identity.fingerprint()?;

    println!();
    println!("A Machine Owner Key enrollment request is pending.");
    println!();
    println!("  certificate : {}", identity.cert_path.display());
    println!("  common name : {}", identity.common_name);
    println!("  sha256      : {fingerprint}");
    println!();
    println!("To complete enrollment:");
    println!("  1. Reboot this machine.");
    println!("  2. In the blue MOK manager screen, choose 'Enroll MOK'.");
    println!("  3. Confirm the key (verify the fingerprint above) and enter");
    println!("     the password you just chose.");
    println!("  4. Continue booting, then run this command again.");
    println!();
    println!("No modules were signed or loaded in this run: signing with an");
    println!("unenrolled key would only give a false sense of completion.");
    println!();

    Ok(())
}

/// Run mokutil with captured output, returning combined stdout and stderr.
///
/// mokutil prints some states (e.g. "EFI variables are not supported") to
/// stderr with a non-zero exit; callers classify from the text instead of
/// the exit code.
async fn run_mokutil(args: &[&str]) -> anyhow::Result<String> {
    let args_owned: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();

    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("mokutil").args(&args_owned).output()
    })
    .await
    .context("mokutil task panicked")?
    .context("failed to run mokutil")?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    Ok(text)
}

/// Parse `mokutil --sb-state` output.
///
/// Returns `Some(true)` when Secure Boot is enabled, `Some(false)` when
/// disabled, and `None` when the state cannot be determined (no EFI
/// variables, unexpected output).
pub fn parse_sb_state(output: &str) -> Option<bool> {
    for line in output.lines() {
        let line = line.trim();
        if line.contains("SecureBoot enabled") {
            return Some(true);
        }
        if line.contains("SecureBoot disabled") {
            return Some(false);
        }
    }
    None
}

/// Returns `true` when an enrolled-key listing contains a certificate whose
/// subject carries `common_name`.
///
/// mokutil listings contain lines like
/// `Subject: CN=moktrust kernel module signing`; matching is restricted to
/// subject lines so issuer or comment text cannot produce false positives.
pub fn enrolled_list_contains(listing: &str, common_name: &str) -> bool {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("Subject:"))
        .any(|line| line.contains(common_name))
}
