//! Best-effort restart of services that depend on the managed modules.
//!
//! Networking stacks hold the driver state the freshly loaded modules
//! provide, so each known mechanism is tried in order: systemd units
//! first, then the legacy init wrapper. Every attempt is independent and
//! tolerated on failure — the goal is propagation, not a guarantee, and a
//! host normally carries only one of these mechanisms. All
//! `std::process::Command` invocations use hardcoded arguments only.

use tracing::{debug, info, warn};

/// Restart sequence, tried in order. systemd restarts cover modern hosts;
/// the `service` wrapper covers sysvinit leftovers.
const RESTART_ATTEMPTS: &[&[&str]] = &[
    &["systemctl", "restart", "NetworkManager"],
    &["systemctl", "restart", "systemd-networkd"],
    &["service", "network-manager", "restart"],
    &["service", "networking", "restart"],
];

/// Run every known network service restart mechanism, tolerating
/// individual failures.
pub async fn refresh_network_services() {
    info!("refreshing network services");

    for attempt in RESTART_ATTEMPTS {
        restart_attempt(attempt).await;
    }
}

/// Run a single restart command with suppressed output. Non-zero exits and
/// spawn failures are logged at debug level: on any given host most of the
/// mechanisms simply do not exist.
async fn restart_attempt(argv: &[&str]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };

    let program_owned = (*program).to_owned();
    let args_owned: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
    let command_display = argv.join(" ");

    let result = tokio::task::spawn_blocking(move || {
        std::process::Command::new(&program_owned)
            .args(&args_owned)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
    })
    .await;

    match result {
        Ok(Ok(status)) if status.success() => {
            info!(command = %command_display, "service restarted");
        }
        Ok(Ok(status)) => {
            debug!(
                command = %command_display,
                exit_code = ?status.code(),
                "restart returned non-zero (service may not exist on this host)"
            );
        }
        Ok(Err(e)) => {
            debug!(command = %command_display, error = %e, "restart mechanism unavailable");
        }
        Err(e) => {
            warn!(command = %command_display, error = %e, "restart task panicked");
        }
    }
}
