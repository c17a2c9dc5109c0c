//! Publish, look up, update, and reverse-resolve fingerprint-indexed key
//! bundles.
//!
//! Forward bundles and reverse mappings live at separate keys derived from
//! the fingerprint; aliases live at keys derived from the lowercase name.
//! Everything is stored through the substrate's replacing signed puts with
//! `value_id = 1`, so a key resolves deterministically even though the
//! underlying DHT is append-only.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use keymesh_core::constants::{
    CANONICAL_VALUE_ID, FINGERPRINT_HEX_CHARS, KEY_SUFFIX_LOOKUP, KEY_SUFFIX_PUBKEY,
    KEY_SUFFIX_REVERSE, TTL_365DAY_SECS,
};
use keymesh_core::names::normalize_name;
use keymesh_core::time::now_secs;
use keymesh_core::types::Fingerprint;
use keymesh_core::KeymeshError;
use keymesh_crypto::{fingerprint_from_pubkey, overlay_key};
use keymesh_dht::DhtSubstrate;

use crate::bundle::KeyBundle;
use crate::reverse::ReverseRecord;

/// DHT key of the forward bundle: `SHA3-512(fp_hex ‖ ":pubkey")`.
pub fn pubkey_key(fp: &Fingerprint) -> Vec<u8> {
    overlay_key(&[fp.to_hex().as_bytes(), KEY_SUFFIX_PUBKEY.as_bytes()])
}

/// DHT key of the reverse mapping: `SHA3-512(fp_hex ‖ ":reverse")`.
pub fn reverse_key(fp: &Fingerprint) -> Vec<u8> {
    overlay_key(&[fp.to_hex().as_bytes(), KEY_SUFFIX_REVERSE.as_bytes()])
}

/// DHT key of a name alias: `SHA3-512(lowercase_name ‖ ":lookup")`.
pub fn alias_key(normalized_name: &str) -> Vec<u8> {
    overlay_key(&[normalized_name.as_bytes(), KEY_SUFFIX_LOOKUP.as_bytes()])
}

pub struct Keyserver<D: DhtSubstrate> {
    dht: Arc<D>,
}

impl<D: DhtSubstrate> Keyserver<D> {
    pub fn new(dht: Arc<D>) -> Self {
        Self { dht }
    }

    fn year() -> Duration {
        Duration::from_secs(TTL_365DAY_SECS)
    }

    // ── Publish ──────────────────────────────────────────────────────────────

    /// Publish a fresh key bundle (version 1) and, when a display name is
    /// set, the signed reverse mapping.
    pub fn publish(
        &self,
        fingerprint: &Fingerprint,
        display_name: Option<&str>,
        dilithium_pub: &[u8],
        kyber_pub: &[u8],
        dilithium_secret: &[u8],
    ) -> Result<KeyBundle, KeymeshError> {
        if fingerprint_from_pubkey(dilithium_pub) != *fingerprint {
            return Err(KeymeshError::InvalidArgument(
                "fingerprint does not match the signing key".into(),
            ));
        }
        let bundle = KeyBundle::build(
            fingerprint.clone(),
            display_name.map(String::from),
            dilithium_pub.to_vec(),
            kyber_pub.to_vec(),
            now_secs(),
            1,
            dilithium_secret,
        )?;
        self.dht.put_signed_permanent(
            &pubkey_key(fingerprint),
            &bundle.to_json()?,
            CANONICAL_VALUE_ID,
        )?;

        if let Some(name) = &bundle.display_name {
            let reverse = ReverseRecord::build(
                dilithium_pub.to_vec(),
                name.clone(),
                bundle.timestamp,
                dilithium_secret,
            )?;
            self.dht.put_signed(
                &reverse_key(fingerprint),
                &reverse.to_json()?,
                CANONICAL_VALUE_ID,
                Self::year(),
            )?;

            // A display name that is also a registrable name claims the
            // alias. Someone else holding it is not a publish failure.
            if normalize_name(name).is_ok() {
                match self.publish_alias(name, fingerprint) {
                    Ok(()) => {}
                    Err(KeymeshError::Conflict(msg)) => {
                        warn!(%msg, "display name alias not claimed")
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(bundle)
    }

    // ── Aliases ──────────────────────────────────────────────────────────────

    /// Bind `name` to `fingerprint`. Re-binding to the same fingerprint is
    /// idempotent; a name already bound to a different fingerprint is a
    /// conflict.
    pub fn publish_alias(
        &self,
        name: &str,
        fingerprint: &Fingerprint,
    ) -> Result<(), KeymeshError> {
        let normalized = normalize_name(name)?;
        match self.resolve_name(&normalized) {
            Ok(existing) if existing != *fingerprint => {
                return Err(KeymeshError::Conflict(format!(
                    "name '{}' is owned by another identity",
                    normalized
                )));
            }
            Ok(_) | Err(KeymeshError::NotFound) => {}
            Err(e) => return Err(e),
        }
        self.store_alias(&normalized, fingerprint)
    }

    /// Write the alias record without the ownership check. Key-rotation
    /// re-publish goes through here.
    fn store_alias(&self, normalized: &str, fingerprint: &Fingerprint) -> Result<(), KeymeshError> {
        self.dht.put_signed(
            &alias_key(normalized),
            fingerprint.to_hex().as_bytes(),
            CANONICAL_VALUE_ID,
            Self::year(),
        )
    }

    /// Resolve a (validated) name to a fingerprint. The alias payload is
    /// exactly the 128 ASCII hex characters of the fingerprint.
    pub fn resolve_name(&self, name: &str) -> Result<Fingerprint, KeymeshError> {
        let normalized = normalize_name(name)?;
        let bytes = self.dht.get(&alias_key(&normalized))?;
        if bytes.len() != FINGERPRINT_HEX_CHARS {
            return Err(KeymeshError::Serialization(format!(
                "alias record has {} bytes, expected {}",
                bytes.len(),
                FINGERPRINT_HEX_CHARS
            )));
        }
        let hex = std::str::from_utf8(&bytes)
            .map_err(|_| KeymeshError::Serialization("alias record is not ASCII".into()))?;
        Fingerprint::from_hex(hex)
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Look up a bundle by name or by 128-hex fingerprint.
    pub fn lookup(&self, name_or_fingerprint: &str) -> Result<KeyBundle, KeymeshError> {
        let fp = if Fingerprint::looks_like_fingerprint(name_or_fingerprint) {
            Fingerprint::from_hex(name_or_fingerprint)?
        } else {
            self.resolve_name(name_or_fingerprint)?
        };
        self.fetch_bundle(&fp)
    }

    /// Fetch and select the newest verified bundle at a fingerprint.
    ///
    /// A version failing verification is poisoned DHT data: discarded with a
    /// log line while older verified versions remain eligible.
    pub fn fetch_bundle(&self, fp: &Fingerprint) -> Result<KeyBundle, KeymeshError> {
        let values = self.dht.get_all(&pubkey_key(fp))?;
        if values.is_empty() {
            return Err(KeymeshError::NotFound);
        }
        let mut best: Option<KeyBundle> = None;
        for value in values {
            let bundle = match KeyBundle::from_json(&value) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "undecodable key bundle");
                    continue;
                }
            };
            if bundle.fingerprint != *fp || bundle.verify().is_err() {
                warn!(fingerprint = %fp, "discarding key bundle that fails verification");
                continue;
            }
            if best.as_ref().map_or(true, |b| bundle.timestamp > b.timestamp) {
                best = Some(bundle);
            }
        }
        best.ok_or(KeymeshError::SignatureInvalid)
    }

    // ── Reverse lookup ───────────────────────────────────────────────────────

    /// Resolve a fingerprint to its asserted display name.
    pub fn reverse_lookup(&self, fp: &Fingerprint) -> Result<String, KeymeshError> {
        let values = self.dht.get_all(&reverse_key(fp))?;
        if values.is_empty() {
            return Err(KeymeshError::NotFound);
        }
        let mut best: Option<ReverseRecord> = None;
        for value in values {
            let record = match ReverseRecord::from_json(&value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "undecodable reverse record");
                    continue;
                }
            };
            if record.fingerprint != *fp || record.verify().is_err() {
                warn!(fingerprint = %fp, "discarding reverse record that fails verification");
                continue;
            }
            if best.as_ref().map_or(true, |b| record.timestamp > b.timestamp) {
                best = Some(record);
            }
        }
        best.map(|r| r.identity).ok_or(KeymeshError::SignatureInvalid)
    }

    /// Cooperative reverse lookup: `callback` receives the resolved name, or
    /// `None` when the fingerprint has no verifiable mapping. Runs on the
    /// substrate's task, never the caller's.
    pub fn reverse_lookup_async(
        &self,
        fp: &Fingerprint,
        callback: Box<dyn FnOnce(Option<String>) + Send>,
    ) {
        let expected = fp.clone();
        let mut slot = Some(callback);
        self.dht.get_async(
            &reverse_key(fp),
            Box::new(move |value| match value {
                Some(bytes) => {
                    if let Ok(record) = ReverseRecord::from_json(&bytes) {
                        if record.fingerprint == expected && record.verify().is_ok() {
                            if let Some(cb) = slot.take() {
                                cb(Some(record.identity));
                            }
                            return false;
                        }
                    }
                    true
                }
                None => {
                    if let Some(cb) = slot.take() {
                        cb(None);
                    }
                    false
                }
            }),
        );
    }

    // ── Key rotation ─────────────────────────────────────────────────────────

    /// Rotate an identity's keys. The new bundle (version + 1) is published
    /// at the key derived from the NEW fingerprint; the old records expire
    /// naturally. An alias owned by the old fingerprint is re-published to
    /// the new one.
    pub fn update(
        &self,
        current: &Fingerprint,
        new_dilithium_pub: &[u8],
        new_kyber_pub: &[u8],
        new_dilithium_secret: &[u8],
    ) -> Result<KeyBundle, KeymeshError> {
        let old = self.fetch_bundle(current)?;
        let new_fp = fingerprint_from_pubkey(new_dilithium_pub);
        let bundle = KeyBundle::build(
            new_fp.clone(),
            old.display_name.clone(),
            new_dilithium_pub.to_vec(),
            new_kyber_pub.to_vec(),
            now_secs(),
            old.version + 1,
            new_dilithium_secret,
        )?;
        self.dht.put_signed_permanent(
            &pubkey_key(&new_fp),
            &bundle.to_json()?,
            CANONICAL_VALUE_ID,
        )?;

        if let Some(name) = &bundle.display_name {
            let reverse = ReverseRecord::build(
                new_dilithium_pub.to_vec(),
                name.clone(),
                bundle.timestamp,
                new_dilithium_secret,
            )?;
            self.dht.put_signed(
                &reverse_key(&new_fp),
                &reverse.to_json()?,
                CANONICAL_VALUE_ID,
                Self::year(),
            )?;

            // Carry owned aliases across the rotation.
            if let Ok(normalized) = normalize_name(name) {
                match self.resolve_name(&normalized) {
                    Ok(owner) if owner == *current => {
                        self.store_alias(&normalized, &new_fp)?;
                    }
                    Ok(_) | Err(KeymeshError::NotFound) => {}
                    Err(e) => warn!(error = %e, "alias re-publish skipped"),
                }
            }
        }
        Ok(bundle)
    }
}
