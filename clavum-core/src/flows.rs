//! Tier-specific key derivation and AEAD flows (spec.md §4.2).

use crate::error::Result;
use crate::models::{AgentId, SecretId, Tier};
use crate::primitives::{
    aesgcm_decrypt, aesgcm_encrypt, hkdf_sha256, x25519_shared, SealedBytes, SecretBytes,
};

const KEK_INFO_PREFIX: &[u8] = b"clavum-kek-v1";

/// `INFO(secret_id) = "clavum-kek-v1" || secret_id`.
fn kek_info(secret_id: &SecretId) -> Vec<u8> {
    let mut info = Vec::with_capacity(KEK_INFO_PREFIX.len() + secret_id.0.len());
    info.extend_from_slice(KEK_INFO_PREFIX);
    info.extend_from_slice(secret_id.0.as_bytes());
    info
}

/// The AAD convention of spec.md §4.2: `secret_id || tier || agent_id`,
/// UTF-8, no delimiter. This byte encoding is part of the wire contract
/// and must not change without a version bump.
pub fn build_aad(secret_id: &SecretId, tier: Tier, agent_id: &AgentId) -> Vec<u8> {
    let tier_str = match tier {
        Tier::Routine => "routine",
        Tier::Sensitive => "sensitive",
        Tier::Critical => "critical",
    };
    let mut aad = Vec::with_capacity(secret_id.0.len() + tier_str.len() + agent_id.0.len());
    aad.extend_from_slice(secret_id.0.as_bytes());
    aad.extend_from_slice(tier_str.as_bytes());
    aad.extend_from_slice(agent_id.0.as_bytes());
    aad
}

/// Routine-tier KEK: `HKDF(X25519(eph_priv, server_pub), kek_salt, INFO(id))`.
///
/// `kek_salt` is a per-secret random 32-byte value supplied by the
/// requester and echoed at retrieval so the server can re-derive the same
/// key. Zeroizes the ECDH output before returning.
pub fn green_kek(
    eph_priv: &[u8; 32],
    server_pub: &[u8; 32],
    kek_salt: &[u8; 32],
    secret_id: &SecretId,
) -> Result<SecretBytes> {
    let shared = x25519_shared(eph_priv, server_pub)?;
    let info = kek_info(secret_id);
    hkdf_sha256(shared.as_bytes(), kek_salt, &info, 32)
}

/// Critical-tier KEK: `HKDF(K_agent || K_phone, challenge, INFO(id))`.
///
/// The challenge (spec.md §4.3) doubles as the HKDF salt, so every
/// retrieval yields a fresh KEK even for a repeated `(secret, reason)`
/// pair. Zeroizes both ECDH outputs before returning.
pub fn red_kek(
    server_priv: &[u8; 32],
    agent_pub: &[u8; 32],
    phone_pub: &[u8; 32],
    challenge: &[u8],
    secret_id: &SecretId,
) -> Result<SecretBytes> {
    let k_agent = x25519_shared(server_priv, agent_pub)?;
    let k_phone = x25519_shared(server_priv, phone_pub)?;

    let mut ikm = Vec::with_capacity(k_agent.len() + k_phone.len());
    ikm.extend_from_slice(k_agent.as_bytes());
    ikm.extend_from_slice(k_phone.as_bytes());

    let info = kek_info(secret_id);
    let kek = hkdf_sha256(&ikm, challenge, &info, 32);
    zeroize::Zeroize::zeroize(&mut ikm);
    kek
}

/// Wrap a DEK under a KEK: `AES-GCM(kek, dek, aad)` with a fresh IV.
pub fn wrap_dek(kek: &[u8; 32], dek: &[u8; 32], aad: &[u8]) -> Result<SealedBytes> {
    aesgcm_encrypt(kek, dek, aad, None)
}

/// Inverse of [`wrap_dek`]. Requires the exact `(kek, iv, aad, tag)` used
/// to wrap.
pub fn unwrap_dek(
    kek: &[u8; 32],
    ciphertext: &[u8],
    iv: &[u8; 12],
    aad: &[u8],
    tag: &[u8; 16],
) -> Result<SecretBytes> {
    aesgcm_decrypt(kek, ciphertext, iv, aad, tag)
}

/// Encrypt a secret's plaintext under its DEK: `AES-GCM(dek, plaintext, aad)`.
pub fn encrypt_secret(dek: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<SealedBytes> {
    aesgcm_encrypt(dek, plaintext, aad, None)
}

/// Inverse of [`encrypt_secret`].
pub fn decrypt_secret(
    dek: &[u8; 32],
    ciphertext: &[u8],
    iv: &[u8; 12],
    aad: &[u8],
    tag: &[u8; 16],
) -> Result<SecretBytes> {
    aesgcm_decrypt(dek, ciphertext, iv, aad, tag)
}
