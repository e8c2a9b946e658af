//! Narrow, auditable cryptographic primitives (spec.md §4.1).
//!
//! Every function that materializes a DEK, KEK, ECDH output, or session key
//! returns or takes a [`SecretBytes`], which zeroizes its contents when
//! dropped on every exit path, including error paths.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{OsRng as RandCoreOsRng, RngCore as RandCoreRngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{ClavumError, Result};

/// A byte buffer holding key material, ECDH output, or any other secret
/// that must not outlive the scope that produced it. Dropping a
/// `SecretBytes` overwrites its contents with zeros (spec.md §4.1, §9).
#[derive(Clone)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into a plain `Vec<u8>` for handoff across a trust boundary
    /// (e.g. onto the wire as base64url). Callers taking this path accept
    /// responsibility for the copy's lifetime.
    pub fn into_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes, redacted)", self.0.len())
    }
}

/// Result of an AES-256-GCM encryption: ciphertext, the IV used, and the
/// 16-byte authentication tag (already appended to `ciphertext` by the
/// underlying AEAD, split out here to match spec.md §4.1's explicit shape).
pub struct SealedBytes {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 12],
    pub tag: [u8; 16],
}

/// Generate a fresh X25519 keypair.
pub fn x25519_keygen() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(RandCoreOsRng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// `X25519(priv32, pub32)` per RFC 7748.
///
/// Rejects low-order / non-canonical points implicitly: `x25519-dalek`
/// clamps the scalar but a result of all-zero bytes indicates a
/// contributory-behavior point, which we treat as [`ClavumError::CryptoFailure`].
pub fn x25519_shared(priv32: &[u8; 32], pub32: &[u8; 32]) -> Result<SecretBytes> {
    let secret = StaticSecret::from(*priv32);
    let public = PublicKey::from(*pub32);
    let shared = secret.diffie_hellman(&public);
    let bytes = shared.to_bytes();
    if bool::from(bytes.ct_eq(&[0u8; 32])) {
        return Err(ClavumError::crypto_failure());
    }
    Ok(SecretBytes::new(bytes.to_vec()))
}

/// Generate a fresh Ed25519 keypair: `(priv32, pub32)`.
pub fn ed25519_keygen() -> ([u8; 32], [u8; 32]) {
    use ed25519_dalek::SigningKey;
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    (
        signing_key.to_bytes(),
        signing_key.verifying_key().to_bytes(),
    )
}

/// Deterministic Ed25519 signature over `msg` (RFC 8032).
pub fn ed25519_sign(priv32: &[u8; 32], msg: &[u8]) -> [u8; 64] {
    use ed25519_dalek::{Signer, SigningKey};
    let signing_key = SigningKey::from_bytes(priv32);
    signing_key.sign(msg).to_bytes()
}

/// Verify an Ed25519 signature. Never panics on malformed input; a
/// malformed public key or signature is simply `false`.
pub fn ed25519_verify(pub32: &[u8; 32], msg: &[u8], sig: &[u8; 64]) -> bool {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    let Ok(verifying_key) = VerifyingKey::from_bytes(pub32) else {
        return false;
    };
    let signature = Signature::from_bytes(sig);
    verifying_key.verify(msg, &signature).is_ok()
}

/// `AES-256-GCM(key32, plaintext, aad, iv12?)`. Draws a fresh IV from the
/// CSPRNG when `iv` is `None`.
pub fn aesgcm_encrypt(
    key32: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
    iv: Option<[u8; 12]>,
) -> Result<SealedBytes> {
    let cipher = Aes256Gcm::new_from_slice(key32).map_err(|_| ClavumError::crypto_failure())?;
    let iv = iv.unwrap_or_else(|| {
        let mut buf = [0u8; 12];
        RandCoreOsRng.fill_bytes(&mut buf);
        buf
    });
    let nonce = Nonce::from_slice(&iv);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| ClavumError::crypto_failure())?;

    // aes-gcm appends the 16-byte tag to the ciphertext; split it back out
    // so callers get the explicit (ciphertext, iv, tag) triple of §4.1.
    if sealed.len() < 16 {
        return Err(ClavumError::crypto_failure());
    }
    let split_at = sealed.len() - 16;
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&sealed[split_at..]);

    Ok(SealedBytes {
        ciphertext: sealed[..split_at].to_vec(),
        iv,
        tag,
    })
}

/// Inverse of [`aesgcm_encrypt`]. Fails atomically — and only with
/// [`ClavumError::CryptoFailure`] — on any tampering of key, ciphertext,
/// AAD, or tag.
pub fn aesgcm_decrypt(
    key32: &[u8; 32],
    ciphertext: &[u8],
    iv: &[u8; 12],
    aad: &[u8],
    tag: &[u8; 16],
) -> Result<SecretBytes> {
    let cipher = Aes256Gcm::new_from_slice(key32).map_err(|_| ClavumError::crypto_failure())?;
    let nonce = Nonce::from_slice(iv);

    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| ClavumError::crypto_failure())?;

    Ok(SecretBytes::new(plaintext))
}

/// `HKDF-SHA256(ikm, salt, info, out_len)`.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Result<SecretBytes> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .map_err(|_| ClavumError::crypto_failure())?;
    Ok(SecretBytes::new(okm))
}

/// `HMAC-SHA256(key, msg) -> 32`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// `SHA-256(data) -> 32`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// `n` bytes drawn from the OS CSPRNG.
pub fn csprng(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    RandCoreOsRng.fill_bytes(&mut buf);
    buf
}

/// Constant-time byte comparison. Returns `false` on length mismatch;
/// length itself is not treated as secret, matching spec.md §4.1.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}
