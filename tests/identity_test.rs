//! Tests for the signing identity store.

use std::path::Path;

use moktrust::config::{HostPaths, IdentityConfig};
use moktrust::host;
use moktrust::identity;

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

fn make_identity_config() -> IdentityConfig {
    IdentityConfig {
        key_dir: std::path::PathBuf::from("/unused"),
        common_name: "moktrust kernel module signing".to_owned(),
    }
}

/// An existing key/certificate pair is returned byte-identical: the store
/// must never regenerate an enrolled identity.
#[tokio::test]
async fn existing_identity_is_never_regenerated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());

    std::fs::create_dir_all(paths.key_file.parent().expect("parent")).expect("mkdir");
    std::fs::write(&paths.key_file, b"fake key material").expect("write key");
    std::fs::write(&paths.cert_file, b"fake der certificate").expect("write cert");

    let identity = identity::ensure_identity(&paths, &make_identity_config())
        .await
        .expect("ensure identity");

    assert_eq!(identity.key_path, paths.key_file);
    assert_eq!(identity.cert_path, paths.cert_file);
    assert_eq!(
        std::fs::read(&paths.key_file).expect("read key"),
        b"fake key material"
    );
    assert_eq!(
        std::fs::read(&paths.cert_file).expect("read cert"),
        b"fake der certificate"
    );
}

/// Generation creates both files with owner-only permissions, and a second
/// call leaves them byte-identical. Skipped when openssl is unavailable.
#[tokio::test]
async fn generation_is_idempotent() {
    if !host::tool_in_path("openssl") {
        eprintln!("openssl not on PATH, skipping generation test");
        return;
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());

    let identity = identity::ensure_identity(&paths, &make_identity_config())
        .await
        .expect("generate identity");

    assert!(identity.key_path.is_file());
    assert!(identity.cert_path.is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let key_mode = std::fs::metadata(&identity.key_path)
            .expect("key metadata")
            .permissions()
            .mode();
        assert_eq!(key_mode & 0o777, 0o600, "key must be owner-only");

        let cert_mode = std::fs::metadata(&identity.cert_path)
            .expect("cert metadata")
            .permissions()
            .mode();
        assert_eq!(cert_mode & 0o777, 0o600, "cert must be owner-only");
    }

    let key_before = std::fs::read(&identity.key_path).expect("read key");
    let cert_before = std::fs::read(&identity.cert_path).expect("read cert");

    let again = identity::ensure_identity(&paths, &make_identity_config())
        .await
        .expect("second ensure");

    assert_eq!(std::fs::read(&again.key_path).expect("read key"), key_before);
    assert_eq!(
        std::fs::read(&again.cert_path).expect("read cert"),
        cert_before
    );
}

#[test]
fn openssl_args_request_der_self_signed_cert() {
    let args = identity::openssl_req_args(
        Path::new("/var/lib/moktrust/moktrust.key"),
        Path::new("/var/lib/moktrust/moktrust.der"),
        "moktrust kernel module signing",
    );

    assert_eq!(args.first().map(String::as_str), Some("req"));
    assert!(args.contains(&"-x509".to_owned()));
    assert!(args.contains(&"rsa:2048".to_owned()));
    assert!(args.contains(&"DER".to_owned()));
    assert!(args.contains(&"/CN=moktrust kernel module signing/".to_owned()));
    assert!(args.contains(&"36500".to_owned()));
}

#[test]
fn fingerprint_is_colon_separated_sha256() {
    use sha2::Digest;

    let dir = tempfile::tempdir().expect("tempdir");
    let paths = make_paths(dir.path());

    std::fs::create_dir_all(paths.key_file.parent().expect("parent")).expect("mkdir");
    std::fs::write(&paths.cert_file, b"certificate bytes").expect("write cert");

    let identity = moktrust::identity::SigningIdentity {
        key_path: paths.key_file.clone(),
        cert_path: paths.cert_file.clone(),
        common_name: "test".to_owned(),
    };

    let fingerprint = identity.fingerprint().expect("fingerprint");

    let digest = sha2::Sha256::digest(b"certificate bytes");
    let expected: Vec<String> = hex::encode_upper(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect();

    assert_eq!(fingerprint, expected.join(":"));
    assert_eq!(fingerprint.len(), 95); // 32 pairs + 31 colons
}
