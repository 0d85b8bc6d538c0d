// msg-crypto: deterministic helpers for channel identity and optional
// payload protection. All primitives are stateless and safe for
// concurrent use; none of them perform I/O.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("authentication failed while unwrapping envelope")]
    AuthenticationFailed,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("RSA error: {0}")]
    Rsa(String),
}

// ---------------------------------------------------------------------------
// Channel identity
// ---------------------------------------------------------------------------

/// `base64(SHA256(name || password))` — the local secret derivation used to
/// hash a channel password before it ever goes on the wire.
pub fn derive_channel_secret(name: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// `base64(HMAC_SHA256(secret, password))` — the value actually sent as
/// `channelPassword` on `/connect` and `/create-channel`.
pub fn hash_password(password: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(password.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// `hex(SHA256(name || password || developerKeySecret))`.
///
/// Implementations may skip this entirely when the server is trusted to
/// mint the channel id from name+password hash alone; this helper exists
/// for callers that want to derive it locally instead.
pub fn generate_channel_id(name: &str, password: &str, developer_key_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(developer_key_secret.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// X25519 / HKDF / AES-256-GCM envelope
// ---------------------------------------------------------------------------

const ENVELOPE_ALG: &str = "X25519-HKDF-SHA256-AES256GCM";
const NONCE_LEN: usize = 12;

/// An encrypted payload addressed to one recipient, produced by
/// [`envelope_wrap`].
#[derive(Debug, Clone)]
pub struct Envelope {
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub alg: String,
}

fn derive_envelope_key(
    shared_secret: &x25519_dalek::SharedSecret,
    channel_id: &str,
    recipient_name: &str,
) -> [u8; 32] {
    let info = format!("channel-envelope|{channel_id}|{recipient_name}");
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

fn envelope_aad(channel_id: &str, recipient_name: &str) -> Vec<u8> {
    format!("{channel_id}|{recipient_name}").into_bytes()
}

/// Encrypt `plaintext` for `recipient_pub` using an ephemeral X25519 key.
pub fn envelope_wrap(
    recipient_pub: &PublicKey,
    plaintext: &[u8],
    channel_id: &str,
    recipient_name: &str,
) -> Result<Envelope, CryptoError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(recipient_pub);
    let key = derive_envelope_key(&shared, channel_id, recipient_name);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let aad = envelope_aad(channel_id, recipient_name);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: plaintext, aad: &aad },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Envelope {
        ephemeral_pub: ephemeral_pub.to_bytes(),
        nonce: nonce_bytes,
        ciphertext,
        alg: ENVELOPE_ALG.to_owned(),
    })
}

/// Decrypt an [`Envelope`] addressed to `recipient_priv`.
///
/// Fails with [`CryptoError::AuthenticationFailed`] if the AEAD tag does not
/// verify — including when `channel_id`/`recipient_name` don't match what
/// was used to wrap, since both are bound into the AAD.
pub fn envelope_unwrap(
    recipient_priv: &StaticSecret,
    envelope: &Envelope,
    channel_id: &str,
    recipient_name: &str,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.alg != ENVELOPE_ALG {
        return Err(CryptoError::InvalidEnvelope(format!(
            "unsupported alg: {}",
            envelope.alg
        )));
    }
    let ephemeral_pub = PublicKey::from(envelope.ephemeral_pub);
    let shared = recipient_priv.diffie_hellman(&ephemeral_pub);
    let key = derive_envelope_key(&shared, channel_id, recipient_name);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let aad = envelope_aad(channel_id, recipient_name);
    cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload { msg: &envelope.ciphertext, aad: &aad },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

// ---------------------------------------------------------------------------
// RSA-OAEP (request-password sub-flow)
// ---------------------------------------------------------------------------

/// RSA-2048 OAEP-SHA256 encryption of a short secret.
pub fn rsa_encrypt(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

pub fn rsa_decrypt(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};

    #[test]
    fn derive_channel_secret_is_deterministic() {
        let a = derive_channel_secret("room-1", "hunter2");
        let b = derive_channel_secret("room-1", "hunter2");
        assert_eq!(a, b);
        assert_ne!(a, derive_channel_secret("room-1", "other"));
    }

    #[test]
    fn generate_channel_id_is_a_pure_function() {
        let a = generate_channel_id("room-1", "hunter2", "dev-key");
        let b = generate_channel_id("room-1", "hunter2", "dev-key");
        assert_eq!(a, b);
        assert_ne!(a, generate_channel_id("room-1", "hunter2", "other-dev-key"));
    }

    #[test]
    fn hash_password_changes_with_secret() {
        let secret_a = derive_channel_secret("room-1", "pw");
        let secret_b = derive_channel_secret("room-2", "pw");
        assert_ne!(hash_password("pw", &secret_a), hash_password("pw", &secret_b));
    }

    fn keypair() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn envelope_round_trips_for_matching_channel_and_recipient() {
        let (priv_key, pub_key) = keypair();
        let plaintext = b"hello, bob";
        let envelope = envelope_wrap(&pub_key, plaintext, "chan-1", "bob").unwrap();
        let decrypted = envelope_unwrap(&priv_key, &envelope, "chan-1", "bob").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn envelope_unwrap_fails_on_wrong_channel_id() {
        let (priv_key, pub_key) = keypair();
        let envelope = envelope_wrap(&pub_key, b"secret", "chan-1", "bob").unwrap();
        let result = envelope_unwrap(&priv_key, &envelope, "chan-2", "bob");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn envelope_unwrap_fails_on_wrong_recipient_name() {
        let (priv_key, pub_key) = keypair();
        let envelope = envelope_wrap(&pub_key, b"secret", "chan-1", "bob").unwrap();
        let result = envelope_unwrap(&priv_key, &envelope, "chan-1", "carol");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn envelope_unwrap_fails_with_wrong_key() {
        let (_priv_key, pub_key) = keypair();
        let (other_priv, _other_pub) = keypair();
        let envelope = envelope_wrap(&pub_key, b"secret", "chan-1", "bob").unwrap();
        let result = envelope_unwrap(&other_priv, &envelope, "chan-1", "bob");
        assert!(result.is_err());
    }

    const TEST_RSA_PRIV_PEM: &str = include_str!("../testdata/test_rsa_priv.pem");
    const TEST_RSA_PUB_PEM: &str = include_str!("../testdata/test_rsa_pub.pem");

    #[test]
    fn rsa_oaep_round_trips() {
        let private_key = RsaPrivateKey::from_pkcs8_pem(TEST_RSA_PRIV_PEM).unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(TEST_RSA_PUB_PEM).unwrap();
        let plaintext = b"short-lived-secret";
        let ciphertext = rsa_encrypt(&public_key, plaintext).unwrap();
        let decrypted = rsa_decrypt(&private_key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}
