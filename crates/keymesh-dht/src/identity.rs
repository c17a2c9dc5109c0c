//! On-disk node identity for bootstrap nodes.
//!
//! Two PEM files at a configured base path: `<base>.crt` (self-signed X.509
//! certificate) and `<base>.pem` (Ed25519 private key), both owner-read-write
//! only. Absent files are generated on first start. User nodes run ephemeral
//! identities unless the host application supplies one.

use std::fs;
use std::path::{Path, PathBuf};

use libp2p::identity;
use rcgen::{Certificate, CertificateParams, DnType, KeyPair as CertKeyPair, PKCS_ED25519};
use tracing::info;

use keymesh_core::KeymeshError;

fn cert_path(base: &Path) -> PathBuf {
    base.with_extension("crt")
}

fn key_path(base: &Path) -> PathBuf {
    base.with_extension("pem")
}

/// Extract the raw Ed25519 seed from a PKCS#8 DER blob.
///
/// Both the 48-byte v1 layout and ring's v2 layout wrap the seed in
/// `OCTET STRING(34) { OCTET STRING(32) }`; scan for that marker rather
/// than assuming a fixed offset.
fn ed25519_seed_from_pkcs8(der: &[u8]) -> Option<[u8; 32]> {
    const MARKER: [u8; 4] = [0x04, 0x22, 0x04, 0x20];
    let pos = der.windows(4).position(|w| w == MARKER)?;
    let start = pos + 4;
    if der.len() < start + 32 {
        return None;
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&der[start..start + 32]);
    Some(seed)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Ephemeral identity for user nodes.
pub fn ephemeral() -> identity::Keypair {
    identity::Keypair::generate_ed25519()
}

/// Load the node identity from `<base>.pem`, or generate and persist a fresh
/// certificate + key pair when the files are missing.
pub fn load_or_generate(base: &Path) -> Result<identity::Keypair, KeymeshError> {
    let key_file = key_path(base);
    if key_file.exists() {
        let pem = fs::read_to_string(&key_file)
            .map_err(|e| KeymeshError::Storage(format!("reading {}: {e}", key_file.display())))?;
        let keypair = CertKeyPair::from_pem(&pem)
            .map_err(|e| KeymeshError::InvalidArgument(format!("bad identity key: {e}")))?;
        let seed = ed25519_seed_from_pkcs8(&keypair.serialize_der())
            .ok_or_else(|| KeymeshError::InvalidArgument("identity key is not Ed25519".into()))?;
        return identity::Keypair::ed25519_from_bytes(seed)
            .map_err(|e| KeymeshError::InvalidArgument(format!("bad identity seed: {e}")));
    }

    if let Some(dir) = base.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .map_err(|e| KeymeshError::Storage(format!("creating {}: {e}", dir.display())))?;
        }
    }

    let mut params = CertificateParams::new(Vec::<String>::new());
    params.alg = &PKCS_ED25519;
    params
        .distinguished_name
        .push(DnType::CommonName, "keymesh-node");
    let cert = Certificate::from_params(params)
        .map_err(|e| KeymeshError::Storage(format!("generating identity: {e}")))?;

    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| KeymeshError::Storage(format!("serializing certificate: {e}")))?;
    let key_pem = cert.serialize_private_key_pem();

    let cert_file = cert_path(base);
    fs::write(&cert_file, cert_pem)
        .map_err(|e| KeymeshError::Storage(format!("writing {}: {e}", cert_file.display())))?;
    fs::write(&key_file, &key_pem)
        .map_err(|e| KeymeshError::Storage(format!("writing {}: {e}", key_file.display())))?;
    restrict_permissions(&cert_file)
        .and_then(|_| restrict_permissions(&key_file))
        .map_err(|e| KeymeshError::Storage(format!("restricting identity permissions: {e}")))?;
    info!(path = %base.display(), "generated new node identity");

    let seed = ed25519_seed_from_pkcs8(&cert.serialize_private_key_der())
        .ok_or_else(|| KeymeshError::Storage("generated key has unexpected layout".into()))?;
    identity::Keypair::ed25519_from_bytes(seed)
        .map_err(|e| KeymeshError::Storage(format!("bad generated seed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_reload_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("identity");

        let first = load_or_generate(&base).unwrap();
        assert!(base.with_extension("crt").exists());
        assert!(base.with_extension("pem").exists());

        let second = load_or_generate(&base).unwrap();
        assert_eq!(
            first.public().to_peer_id(),
            second.public().to_peer_id(),
            "reload must yield the same identity"
        );
    }

    #[cfg(unix)]
    #[test]
    fn identity_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("identity");
        load_or_generate(&base).unwrap();
        let mode = fs::metadata(base.with_extension("pem"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn seed_extraction_handles_v1_layout() {
        // Minimal PKCS#8 v1 Ed25519 structure around a known seed.
        let seed = [0xAB; 32];
        let mut der = vec![
            0x30, 0x2E, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2B, 0x65, 0x70, 0x04, 0x22,
            0x04, 0x20,
        ];
        der.extend_from_slice(&seed);
        assert_eq!(ed25519_seed_from_pkcs8(&der), Some(seed));
    }
}
