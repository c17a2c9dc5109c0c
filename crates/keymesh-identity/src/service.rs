//! The identity service: profile storage, payment-gated name registration
//! with 365-day renewal semantics, and address resolution.

use std::sync::Arc;

use tracing::warn;

use keymesh_core::constants::{
    CANONICAL_VALUE_ID, KEY_SUFFIX_PROFILE, NAME_REGISTRATION_SECS,
};
use keymesh_core::names::normalize_name;
use keymesh_core::time::now_secs;
use keymesh_core::types::Fingerprint;
use keymesh_core::KeymeshError;
use keymesh_crypto::overlay_key;
use keymesh_dht::DhtSubstrate;
use keymesh_keyserver::Keyserver;

use crate::payment::PaymentVerifier;
use crate::record::{IdentityRecord, ProfilePatch};

/// DHT key of the unified identity record: `SHA3-512(fp_hex ‖ ":profile")`.
pub fn profile_key(fp: &Fingerprint) -> Vec<u8> {
    overlay_key(&[fp.to_hex().as_bytes(), KEY_SUFFIX_PROFILE.as_bytes()])
}

pub struct IdentityService<D: DhtSubstrate> {
    dht: Arc<D>,
    keyserver: Keyserver<D>,
    verifier: Arc<dyn PaymentVerifier>,
}

impl<D: DhtSubstrate> IdentityService<D> {
    pub fn new(dht: Arc<D>, verifier: Arc<dyn PaymentVerifier>) -> Self {
        let keyserver = Keyserver::new(Arc::clone(&dht));
        Self {
            dht,
            keyserver,
            verifier,
        }
    }

    pub fn keyserver(&self) -> &Keyserver<D> {
        &self.keyserver
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Load the current identity: fetch every accumulated version, discard
    /// anything that fails verification, and return the survivor with the
    /// greatest timestamp. Newest-verified-wins IS the conflict resolution
    /// for the append-only substrate.
    pub fn load_identity(&self, fp: &Fingerprint) -> Result<IdentityRecord, KeymeshError> {
        let values = self.dht.get_all(&profile_key(fp))?;
        if values.is_empty() {
            return Err(KeymeshError::NotFound);
        }
        let mut best: Option<IdentityRecord> = None;
        for value in values {
            let record = match IdentityRecord::from_json(&value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "undecodable identity record");
                    continue;
                }
            };
            if record.fingerprint != *fp || record.verify().is_err() {
                // Poisoned DHT data: drop this version, keep older good ones.
                warn!(fingerprint = %fp, "discarding identity record that fails verification");
                continue;
            }
            if best.as_ref().map_or(true, |b| record.timestamp > b.timestamp) {
                best = Some(record);
            }
        }
        best.ok_or(KeymeshError::SignatureInvalid)
    }

    /// Load the identity, or build an unsigned skeleton from the published
    /// key bundle when none exists yet.
    fn load_or_create(&self, fp: &Fingerprint) -> Result<IdentityRecord, KeymeshError> {
        match self.load_identity(fp) {
            Ok(record) => Ok(record),
            Err(KeymeshError::NotFound) => {
                let bundle = self.keyserver.fetch_bundle(fp)?;
                Ok(IdentityRecord::skeleton(
                    fp.clone(),
                    bundle.dilithium_pubkey,
                    bundle.kyber_pubkey,
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn publish(&self, record: &IdentityRecord) -> Result<(), KeymeshError> {
        self.dht.put_signed_permanent(
            &profile_key(&record.fingerprint),
            &record.to_json()?,
            CANONICAL_VALUE_ID,
        )
    }

    // ── Name registration ────────────────────────────────────────────────────

    /// Register `name` for `fp`, gated on the on-chain payment `tx_hash`.
    /// A name already pointing at this fingerprint makes this a renewal; a
    /// name owned by a different fingerprint is a conflict.
    pub fn register_name(
        &self,
        fp: &Fingerprint,
        name: &str,
        tx_hash: &str,
        network: &str,
        dilithium_secret: &[u8],
    ) -> Result<IdentityRecord, KeymeshError> {
        let normalized = normalize_name(name)?;
        self.verifier
            .verify_registration(tx_hash, network, &normalized)?;

        // Squatting check before any write.
        match self.keyserver.resolve_name(&normalized) {
            Ok(owner) if owner != *fp => {
                return Err(KeymeshError::Conflict(format!(
                    "name '{}' is registered to another identity",
                    normalized
                )));
            }
            Ok(_) | Err(KeymeshError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let now = now_secs();
        let mut record = self.load_or_create(fp)?;
        record.has_registered_name = true;
        record.registered_name = normalized.clone();
        record.name_registered_at = now;
        record.name_expires_at = now + NAME_REGISTRATION_SECS;
        record.registration_tx_hash = tx_hash.to_string();
        record.registration_network = network.to_string();
        record.name_version += 1;
        record.version += 1;
        record.timestamp = now;
        record.sign(dilithium_secret)?;

        self.publish(&record)?;
        self.keyserver.publish_alias(&normalized, fp)?;
        Ok(record)
    }

    /// Renew the existing registration: verify the renewal payment against
    /// the stored network and name, extend expiry by a year.
    pub fn renew_name(
        &self,
        fp: &Fingerprint,
        renewal_tx_hash: &str,
        dilithium_secret: &[u8],
    ) -> Result<IdentityRecord, KeymeshError> {
        let mut record = self.load_identity(fp)?;
        if !record.has_registered_name || record.registered_name.is_empty() {
            return Err(KeymeshError::NotFound);
        }
        self.verifier.verify_registration(
            renewal_tx_hash,
            &record.registration_network,
            &record.registered_name,
        )?;

        let now = now_secs();
        record.name_expires_at += NAME_REGISTRATION_SECS;
        record.registration_tx_hash = renewal_tx_hash.to_string();
        record.name_version += 1;
        record.version += 1;
        record.timestamp = now;
        record.sign(dilithium_secret)?;

        self.publish(&record)?;
        self.keyserver.publish_alias(&record.registered_name, fp)?;
        Ok(record)
    }

    // ── Profile ──────────────────────────────────────────────────────────────

    /// Overwrite profile fields and republish.
    pub fn update_profile(
        &self,
        fp: &Fingerprint,
        patch: ProfilePatch,
        dilithium_secret: &[u8],
    ) -> Result<IdentityRecord, KeymeshError> {
        let mut record = self.load_or_create(fp)?;
        if let Some(wallets) = patch.wallets {
            record.wallets = wallets;
        }
        if let Some(socials) = patch.socials {
            record.socials = socials;
        }
        if let Some(bio) = patch.bio {
            record.bio = bio;
        }
        if let Some(hash) = patch.profile_picture_hash {
            record.profile_picture_hash = hash;
        }
        record.version += 1;
        record.timestamp = now_secs();
        record.sign(dilithium_secret)?;
        self.publish(&record)?;
        Ok(record)
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// Wallet address of `name_or_fp` on `network`.
    pub fn resolve_address(
        &self,
        name_or_fp: &str,
        network: &str,
    ) -> Result<String, KeymeshError> {
        let fp = if Fingerprint::looks_like_fingerprint(name_or_fp) {
            Fingerprint::from_hex(name_or_fp)?
        } else {
            self.keyserver.resolve_name(name_or_fp)?
        };
        let record = self.load_identity(&fp)?;
        record
            .wallets
            .get(network)
            .cloned()
            .ok_or(KeymeshError::NotFound)
    }

    /// Human-facing name: the registered name while it is live, otherwise a
    /// truncated fingerprint.
    pub fn display_name(&self, fp: &Fingerprint) -> String {
        let now = now_secs();
        match self.load_identity(fp) {
            Ok(record) if record.name_active(now) => record.registered_name,
            _ => format!("{}…", &fp.to_hex()[..16]),
        }
    }
}
