//! Name-registry and profile scenarios against the in-process substrate.

use std::collections::BTreeMap;
use std::sync::Arc;

use keymesh_core::constants::CANONICAL_VALUE_ID;
use keymesh_core::KeymeshError;
use keymesh_crypto::KeyPair;
use keymesh_dht::{DhtSubstrate, LocalDht};
use keymesh_identity::service::profile_key;
use keymesh_identity::{IdentityRecord, IdentityService, PaymentError, PaymentVerifier, ProfilePatch};

// ── Payment verifier doubles ──────────────────────────────────────────────────

struct AcceptAll;
impl PaymentVerifier for AcceptAll {
    fn verify_registration(&self, _: &str, _: &str, _: &str) -> Result<(), PaymentError> {
        Ok(())
    }
}

struct RejectAll;
impl PaymentVerifier for RejectAll {
    fn verify_registration(&self, tx: &str, _: &str, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::Rejected(format!("tx {tx} pays nothing")))
    }
}

struct RpcDown;
impl PaymentVerifier for RpcDown {
    fn verify_registration(&self, _: &str, _: &str, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::Rpc("endpoint unreachable".into()))
    }
}

fn service_with(
    verifier: Arc<dyn PaymentVerifier>,
) -> (IdentityService<LocalDht>, Arc<LocalDht>) {
    let dht = Arc::new(LocalDht::new());
    (IdentityService::new(Arc::clone(&dht), verifier), dht)
}

/// Publish a key bundle so the registry has keys to build identities from.
fn onboard(service: &IdentityService<LocalDht>, kp: &KeyPair, name: &str) {
    service
        .keyserver()
        .publish(
            &kp.fingerprint,
            Some(name),
            &kp.dilithium_public.0,
            &kp.kyber_public.0,
            kp.dilithium_secret_bytes(),
        )
        .expect("publish bundle");
}

// ── Registration ─────────────────────────────────────────────────────────────

#[test]
fn fresh_registration_anchors_name_and_alias() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");

    let record = service
        .register_name(&alice.fingerprint, "Alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    assert!(record.has_registered_name);
    assert_eq!(record.registered_name, "alice");
    assert_eq!(record.name_version, 1);
    assert_eq!(record.registration_tx_hash, "tx1");
    assert!(record.name_expires_at > record.name_registered_at);
    assert!(record.verify().is_ok());

    let loaded = service.load_identity(&alice.fingerprint).unwrap();
    assert_eq!(loaded, record);
    assert_eq!(
        service.keyserver().resolve_name("alice").unwrap(),
        alice.fingerprint
    );
}

#[test]
fn re_registration_by_owner_is_renewal() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");

    let first = service
        .register_name(&alice.fingerprint, "alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    let second = service
        .register_name(&alice.fingerprint, "alice", "tx2", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    assert_eq!(first.name_version, 1);
    assert_eq!(second.name_version, 2);
    assert!(second.name_expires_at >= first.name_expires_at);
    assert_eq!(second.registration_tx_hash, "tx2");
}

#[test]
fn squatting_is_a_conflict() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    onboard(&service, &alice, "alice");
    onboard(&service, &bob, "bobby");

    service
        .register_name(&alice.fingerprint, "alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    let res = service.register_name(
        &bob.fingerprint,
        "alice",
        "tx2",
        "mainnet",
        bob.dilithium_secret_bytes(),
    );
    assert!(matches!(res, Err(KeymeshError::Conflict(_))));
}

#[test]
fn rejected_payment_is_unauthorized_and_rpc_failure_is_rpc() {
    let alice = KeyPair::generate();

    let (service, _) = service_with(Arc::new(RejectAll));
    onboard(&service, &alice, "alice");
    let res = service.register_name(
        &alice.fingerprint,
        "alice",
        "badtx",
        "mainnet",
        alice.dilithium_secret_bytes(),
    );
    assert!(matches!(res, Err(KeymeshError::Unauthorized)));

    let (service, _) = service_with(Arc::new(RpcDown));
    onboard(&service, &alice, "alice");
    let res = service.register_name(
        &alice.fingerprint,
        "alice",
        "tx",
        "mainnet",
        alice.dilithium_secret_bytes(),
    );
    assert!(matches!(res, Err(KeymeshError::Rpc(_))));
}

#[test]
fn renewal_extends_expiry_and_requires_existing_name() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");

    // No registered name yet.
    let res = service.renew_name(&alice.fingerprint, "tx2", alice.dilithium_secret_bytes());
    assert!(res.is_err());

    let registered = service
        .register_name(&alice.fingerprint, "alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    let renewed = service
        .renew_name(&alice.fingerprint, "tx2", alice.dilithium_secret_bytes())
        .unwrap();
    assert_eq!(renewed.name_version, 2);
    assert_eq!(
        renewed.name_expires_at,
        registered.name_expires_at + keymesh_core::constants::NAME_REGISTRATION_SECS
    );
}

// ── Profiles ─────────────────────────────────────────────────────────────────

#[test]
fn profile_update_overwrites_and_bumps_version() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");

    let mut wallets = BTreeMap::new();
    wallets.insert("mainnet".to_string(), "1AliceAddr".to_string());
    let patch = ProfilePatch {
        wallets: Some(wallets),
        bio: Some("hello".into()),
        ..Default::default()
    };
    let record = service
        .update_profile(&alice.fingerprint, patch, alice.dilithium_secret_bytes())
        .unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.bio, "hello");

    let record = service
        .update_profile(
            &alice.fingerprint,
            ProfilePatch {
                bio: Some("updated".into()),
                ..Default::default()
            },
            alice.dilithium_secret_bytes(),
        )
        .unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.bio, "updated");
    // Untouched fields survive the patch.
    assert_eq!(record.wallets.get("mainnet").unwrap(), "1AliceAddr");
}

#[test]
fn newest_verified_version_wins_over_higher_version_number() {
    let (service, dht) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();

    let mut older = IdentityRecord::skeleton(
        alice.fingerprint.clone(),
        alice.dilithium_public.0.clone(),
        alice.kyber_public.0.clone(),
    );
    older.bio = "newer by time".into();
    older.timestamp = 2_000;
    older.version = 2;
    older.sign(alice.dilithium_secret_bytes()).unwrap();

    let mut later_version = older.clone();
    later_version.bio = "older by time".into();
    later_version.timestamp = 1_000;
    later_version.version = 3;
    later_version.sign(alice.dilithium_secret_bytes()).unwrap();

    let key = profile_key(&alice.fingerprint);
    dht.put_signed_permanent(&key, &older.to_json().unwrap(), CANONICAL_VALUE_ID)
        .unwrap();
    // A concurrent writer lands at a different slot; both versions coexist.
    dht.put_signed_permanent(&key, &later_version.to_json().unwrap(), 2)
        .unwrap();

    let loaded = service.load_identity(&alice.fingerprint).unwrap();
    assert_eq!(loaded.timestamp, 2_000);
    assert_eq!(loaded.bio, "newer by time");
}

#[test]
fn poisoned_versions_are_discarded_not_fatal() {
    let (service, dht) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();

    let mut good = IdentityRecord::skeleton(
        alice.fingerprint.clone(),
        alice.dilithium_public.0.clone(),
        alice.kyber_public.0.clone(),
    );
    good.timestamp = 1_000;
    good.version = 1;
    good.sign(alice.dilithium_secret_bytes()).unwrap();

    let mut poisoned = good.clone();
    poisoned.bio = "tampered after signing".into();
    poisoned.timestamp = 9_000;

    let key = profile_key(&alice.fingerprint);
    dht.put_signed_permanent(&key, &good.to_json().unwrap(), 1).unwrap();
    dht.put_signed_permanent(&key, &poisoned.to_json().unwrap(), 2).unwrap();

    // The tampered (newer) version is dropped; the older verified one loads.
    let loaded = service.load_identity(&alice.fingerprint).unwrap();
    assert_eq!(loaded.timestamp, 1_000);
}

// ── Resolution ───────────────────────────────────────────────────────────────

#[test]
fn resolve_address_by_name_and_by_fingerprint() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");
    service
        .register_name(&alice.fingerprint, "alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();

    let mut wallets = BTreeMap::new();
    wallets.insert("mainnet".to_string(), "1AliceAddr".to_string());
    service
        .update_profile(
            &alice.fingerprint,
            ProfilePatch {
                wallets: Some(wallets),
                ..Default::default()
            },
            alice.dilithium_secret_bytes(),
        )
        .unwrap();

    assert_eq!(service.resolve_address("alice", "mainnet").unwrap(), "1AliceAddr");
    assert_eq!(
        service
            .resolve_address(&alice.fingerprint.to_hex(), "mainnet")
            .unwrap(),
        "1AliceAddr"
    );
    assert!(matches!(
        service.resolve_address("alice", "testnet"),
        Err(KeymeshError::NotFound)
    ));
}

#[test]
fn display_name_falls_back_to_truncated_fingerprint() {
    let (service, _) = service_with(Arc::new(AcceptAll));
    let alice = KeyPair::generate();
    onboard(&service, &alice, "alice");

    // No profile yet: truncated fingerprint with ellipsis.
    let shown = service.display_name(&alice.fingerprint);
    assert_eq!(shown, format!("{}…", &alice.fingerprint.to_hex()[..16]));

    service
        .register_name(&alice.fingerprint, "alice", "tx1", "mainnet", alice.dilithium_secret_bytes())
        .unwrap();
    assert_eq!(service.display_name(&alice.fingerprint), "alice");
}
