//! Moktrust — Secure Boot trust orchestrator for out-of-tree kernel modules.
//!
//! Establishes a MOK (Machine Owner Key) signing identity, enrolls it into
//! the firmware trust store, and reconciles a fixed set of kernel modules
//! against that identity across kernel upgrades: build, verify, sign,
//! depmod, load, autoload registration, and a kernel post-install hook so
//! the whole pipeline re-runs unattended. Every step is idempotent; all
//! state is derived fresh from the host on each run.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Boot-time autoload declaration management.
pub mod autoload;
/// Configuration loading and host path resolution.
pub mod config;
/// Host probes: running kernel, installed kernel trees, tool lookup.
pub mod host;
/// Kernel post-install hook rendering and atomic installation.
pub mod hook;
/// Signing identity: key pair and self-signed certificate.
pub mod identity;
/// Structured logging setup.
pub mod logging;
/// Firmware trust probing and MOK enrollment.
pub mod mok;
/// Build / verify / sign / depmod / load reconciliation pipeline.
pub mod pipeline;
/// Best-effort restart of services that depend on the managed modules.
pub mod services;
