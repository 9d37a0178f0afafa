//! Tests for the reconciliation pipeline against fixture module trees.

use std::path::Path;

use moktrust::config::HostPaths;
use moktrust::identity::SigningIdentity;
use moktrust::pipeline::{self, ReconcileError};

fn make_paths(root: &Path) -> HostPaths {
    HostPaths {
        key_file: root.join("mok/moktrust.key"),
        cert_file: root.join("mok/moktrust.der"),
        modules_root: root.join("lib/modules"),
        headers_root: root.join("usr/src"),
        autoload_conf: root.join("etc/modules-load.d/moktrust.conf"),
        hook_path: root.join("etc/kernel/postinst.d/zz-moktrust"),
        log_dir: root.join("log"),
    }
}

fn make_identity(paths: &HostPaths) -> SigningIdentity {
    std::fs::create_dir_all(paths.key_file.parent().expect("parent")).expect("mkdir mok");
    std::fs::write(&paths.key_file, b"key").expect("write key");
    std::fs::write(&paths.cert_file, b"cert").expect("write cert");

    SigningIdentity {
        key_path: paths.key_file.clone(),
        cert_path: paths.cert_file.clone(),
        common_name: "moktrust kernel module signing".to_owned(),
    }
}

/// Lay down a fixture module tree for one kernel with the given artifacts.
fn seed_kernel(paths: &HostPaths, kver: &str, artifacts: &[&str]) {
    let tree = paths.modules_root.join(kver).join("updates/dkms");
    std::fs::create_dir_all(&tree).expect("mkdir tree");
    std::fs::write(paths.modules_root.join(kver).join("modules.dep"), "").expect("dep");
    for name in artifacts {
        std::fs::write(tree.join(format!("{name}.ko")), b"module bytes").expect("write ko");
    }
}

/// Install a stub signer for one kernel that records each invocation by
/// appending to `<artifact>.signed`.
#[cfg(unix)]
fn seed_signer(paths: &HostPaths, kver: &str) {
    use std::os::unix::fs::PermissionsExt;

    let scripts = paths
        .headers_root
        .join(format!("linux-headers-{kver}"))
        .join("scripts");
    std::fs::create_dir_all(&scripts).expect("mkdir scripts");
    let signer = scripts.join("sign-file");
    std::fs::write(&signer, "#!/bin/sh\nprintf '%s\\n' \"$1\" >> \"$4.signed\"\n")
        .expect("write signer");
    std::fs::set_permissions(&signer, std::fs::Permissions::from_mode(0o755))
        .expect("chmod signer");
}

fn signed_count(paths: &HostPaths, kver: &str, module: &str) -> usize {
    let record = paths
        .modules_root
        .join(kver)
        .join("updates/dkms")
        .join(format!("{module}.ko.signed"));
    match std::fs::read_to_string(record) {
        Ok(content) => content.lines().count(),
        Err(_) => 0,
    }
}

// -- verify_artifacts --

#[test]
fn verify_accepts_complete_artifact_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    seed_kernel(&paths, "6.1.0-a", &["wl", "wlcore"]);

    let modules = vec!["wl".to_owned(), "wlcore".to_owned()];
    assert!(pipeline::verify_artifacts(&paths.modules_root, "6.1.0-a", &modules).is_ok());
}

#[test]
fn verify_fails_whole_kernel_on_any_missing_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    seed_kernel(&paths, "6.1.0-a", &["wl"]);

    let modules = vec!["wl".to_owned(), "wlcore".to_owned()];
    let err = pipeline::verify_artifacts(&paths.modules_root, "6.1.0-a", &modules)
        .expect_err("must fail");

    let ReconcileError::MissingArtifact { module, kver, path } = err;
    assert_eq!(module, "wlcore");
    assert_eq!(kver, "6.1.0-a");
    assert!(path.ends_with("6.1.0-a/updates/dkms/wlcore.ko"));
}

// -- sign_kernel --

#[cfg(unix)]
#[tokio::test]
async fn sign_kernel_signs_each_present_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    let identity = make_identity(&paths);

    seed_kernel(&paths, "6.1.0-a", &["wl"]);
    seed_signer(&paths, "6.1.0-a");

    let modules = vec!["wl".to_owned(), "wlcore".to_owned()];
    let signed = pipeline::sign_kernel(&identity, &paths, "6.1.0-a", &modules).await;

    // wlcore has no artifact for this kernel and is skipped quietly.
    assert_eq!(signed, 1);
    assert_eq!(signed_count(&paths, "6.1.0-a", "wl"), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn sign_kernel_skips_kernel_without_signer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    let identity = make_identity(&paths);

    seed_kernel(&paths, "5.15.0-old", &["wl"]);

    let modules = vec!["wl".to_owned()];
    let signed = pipeline::sign_kernel(&identity, &paths, "5.15.0-old", &modules).await;

    assert_eq!(signed, 0);
    assert_eq!(signed_count(&paths, "5.15.0-old", "wl"), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn resigning_is_idempotent_per_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    let identity = make_identity(&paths);

    seed_kernel(&paths, "6.1.0-a", &["wl"]);
    seed_signer(&paths, "6.1.0-a");

    let modules = vec!["wl".to_owned()];
    pipeline::sign_kernel(&identity, &paths, "6.1.0-a", &modules).await;
    pipeline::sign_kernel(&identity, &paths, "6.1.0-a", &modules).await;

    // The signer is invoked again (re-signing is safe); the pipeline never
    // refuses an already-signed artifact.
    assert_eq!(signed_count(&paths, "6.1.0-a", "wl"), 2);
}

// -- reconcile --

/// Reconciling against one kernel also signs every other installed kernel
/// that has a signer available.
#[cfg(unix)]
#[tokio::test]
async fn reconcile_covers_all_installed_kernels() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    let identity = make_identity(&paths);
    let modules = vec!["wl".to_owned()];

    seed_kernel(&paths, "6.1.0-new", &["wl"]);
    seed_signer(&paths, "6.1.0-new");
    seed_kernel(&paths, "6.1.0-old", &["wl"]);
    seed_signer(&paths, "6.1.0-old");
    // A third kernel without headers: tolerated, skipped.
    seed_kernel(&paths, "5.15.0-ancient", &["wl"]);

    pipeline::reconcile(&paths, &identity, &modules, "6.1.0-new")
        .await
        .expect("reconcile");

    assert_eq!(signed_count(&paths, "6.1.0-new", "wl"), 1);
    assert_eq!(signed_count(&paths, "6.1.0-old", "wl"), 1);
    assert_eq!(signed_count(&paths, "5.15.0-ancient", "wl"), 0);
}

/// A kernel whose build produced no artifact fails reconciliation before
/// anything is signed — no partial artifact set.
#[cfg(unix)]
#[tokio::test]
async fn reconcile_aborts_without_signing_when_artifact_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());
    let identity = make_identity(&paths);
    let modules = vec!["wl".to_owned(), "wlcore".to_owned()];

    // wl exists, wlcore was never built.
    seed_kernel(&paths, "6.1.0-new", &["wl"]);
    seed_signer(&paths, "6.1.0-new");

    let err = pipeline::reconcile(&paths, &identity, &modules, "6.1.0-new")
        .await
        .expect_err("must abort");

    assert!(err.downcast_ref::<ReconcileError>().is_some());
    assert_eq!(signed_count(&paths, "6.1.0-new", "wl"), 0);
}
