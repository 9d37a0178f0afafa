//! Moktrust CLI entry point.
//!
//! A single privileged command with no subcommands: behavior is entirely
//! state-driven. Exit 0 on full success or on the intentional early exit
//! while enrollment awaits a reboot; non-zero on fatal preconditions or a
//! pipeline integrity failure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use moktrust::config::{self, HostPaths};
use moktrust::mok::TrustState;
use moktrust::{autoload, hook, host, identity, logging, mok, pipeline, services};

/// Moktrust — Secure Boot trust orchestrator for out-of-tree kernel modules.
#[derive(Parser)]
#[command(name = "moktrust", version, about)]
struct Cli {}

/// External tools that must exist before any mutation is attempted.
/// openssl is checked separately, only when identity generation is needed.
const REQUIRED_TOOLS: &[&str] = &["mokutil", "depmod", "modprobe"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    let cfg = config::load_config(std::path::Path::new(config::DEFAULT_CONFIG_PATH))
        .context("failed to load configuration")?;
    let paths = HostPaths::from_config(&cfg);

    // File logging needs a root-writable directory; fall back to stderr
    // when unavailable so diagnosis still works.
    let _logging_guard = match logging::init_with_file(&paths.log_dir) {
        Ok(guard) => Some(guard),
        Err(_) => {
            logging::init_stderr();
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "moktrust starting");

    // Fatal preconditions, checked before any mutation.
    anyhow::ensure!(
        host::running_as_root(),
        "moktrust must run as root (key material, module trees, and firmware \
         enrollment all require it)"
    );
    for tool in REQUIRED_TOOLS {
        anyhow::ensure!(
            host::tool_in_path(tool),
            "required tool '{tool}' not found on PATH"
        );
    }

    let state = mok::probe(&cfg.identity.common_name)
        .await
        .context("failed to probe firmware trust state")?;
    info!(state = ?state, "firmware trust state");

    let identity = identity::ensure_identity(&paths, &cfg.identity)
        .await
        .context("failed to ensure signing identity")?;

    if state == TrustState::EnabledUnenrolled {
        if mok::is_enrollment_pending(&identity).await {
            info!("certificate already in the pending enrollment queue");
        } else {
            mok::submit_enrollment(&identity)
                .await
                .context("failed to submit MOK enrollment")?;
        }
        mok::print_enrollment_instructions(&identity)?;
        // Intentional early exit: the pipeline must not run against an
        // unenrolled key. The next invocation after the reboot proceeds.
        return Ok(());
    }

    if state == TrustState::Disabled {
        info!("secure boot disabled; modules are signed anyway for forward compatibility");
    }

    let running = host::running_kernel()
        .await
        .context("failed to determine running kernel")?;

    pipeline::reconcile(&paths, &identity, &cfg.modules.names, &running)
        .await
        .with_context(|| format!("reconciliation failed for kernel {running}"))?;

    if let Err(e) = autoload::ensure_autoload(&paths.autoload_conf, &cfg.modules.names) {
        // Autoload failure does not invalidate what was signed and loaded;
        // report it and keep going so the hook still lands.
        warn!(error = %e, "failed to update autoload declaration");
    }

    services::refresh_network_services().await;

    let hook_content = hook::render_hook(&paths, &cfg.modules.names);
    hook::install_hook(&paths.hook_path, &hook_content)
        .context("failed to install kernel post-install hook")?;

    info!("reconciliation complete");
    Ok(())
}
