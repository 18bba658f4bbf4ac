// src/core/crypto.rs

//! Key exchange primitives: the server's long-lived RSA keypair, the per-attempt
//! verification token, the AES/CFB8 session cipher and the server-id hash sent to the
//! identity authority.

use crate::core::WorldGateError;
use aes::Aes128;
use bytes::Bytes;
use cfb8::cipher::inout::InOutBuf;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::fmt;

/// Length of the verification token sent in the encryption request.
pub const VERIFY_TOKEN_LEN: usize = 4;

/// Length of the client-generated shared secret (an AES-128 key).
pub const SHARED_SECRET_LEN: usize = 16;

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// The server's asymmetric keypair, generated once at startup and shared by every
/// connection through `ServerState`.
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_der: Bytes,
}

impl ServerKeyPair {
    pub fn generate(bits: usize) -> Result<Self, WorldGateError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        Self::from_private_key(private)
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self, WorldGateError> {
        let public = RsaPublicKey::from(&private);
        let der = public
            .to_public_key_der()
            .map_err(|e| WorldGateError::Crypto(format!("failed to encode public key: {e}")))?;
        Ok(Self {
            private,
            public,
            public_der: Bytes::copy_from_slice(der.as_bytes()),
        })
    }

    /// The X.509 SubjectPublicKeyInfo encoding sent in the encryption request.
    pub fn public_der(&self) -> &Bytes {
        &self.public_der
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Decrypts a PKCS#1 v1.5 block produced by the client with our public key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, WorldGateError> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, ciphertext)?)
    }
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// A fresh random nonce issued with each encryption request.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyToken([u8; VERIFY_TOKEN_LEN]);

impl VerifyToken {
    pub fn generate() -> Self {
        let mut token = [0u8; VERIFY_TOKEN_LEN];
        OsRng.fill_bytes(&mut token);
        Self(token)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compares against the decrypted echo without short-circuiting on the first
    /// differing byte.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        if candidate.len() != VERIFY_TOKEN_LEN {
            return false;
        }
        self.0
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl From<[u8; VERIFY_TOKEN_LEN]> for VerifyToken {
    fn from(bytes: [u8; VERIFY_TOKEN_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for VerifyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerifyToken(..)")
    }
}

/// AES-128/CFB8 stream state for both directions of one connection. The shared secret
/// is used as both key and IV.
pub struct SessionCipher {
    enc: Aes128Cfb8Enc,
    dec: Aes128Cfb8Dec,
}

impl SessionCipher {
    pub fn new(shared_secret: &[u8]) -> Result<Self, WorldGateError> {
        if shared_secret.len() != SHARED_SECRET_LEN {
            return Err(WorldGateError::Crypto(format!(
                "shared secret must be {SHARED_SECRET_LEN} bytes, got {}",
                shared_secret.len()
            )));
        }
        let enc = Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)
            .map_err(|e| WorldGateError::Crypto(e.to_string()))?;
        let dec = Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)
            .map_err(|e| WorldGateError::Crypto(e.to_string()))?;
        Ok(Self { enc, dec })
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        let (blocks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.enc.encrypt_blocks_inout_mut(blocks);
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        let (blocks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.dec.decrypt_blocks_inout_mut(blocks);
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCipher(..)")
    }
}

/// Computes the server-id hash the identity authority expects: SHA-1 over the server
/// id, the shared secret and the public key, printed as a signed two's-complement
/// hexadecimal number without leading zeros.
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_der);
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());

    let negative = digest[0] & 0x80 != 0;
    if negative {
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (sum, overflow) = byte.overflowing_add(1);
                *byte = sum;
                carry = overflow;
            }
        }
    }

    let encoded = hex::encode(digest);
    let trimmed = encoded.trim_start_matches('0');
    let magnitude = if trimmed.is_empty() { "0" } else { trimmed };
    if negative {
        format!("-{magnitude}")
    } else {
        magnitude.to_string()
    }
}
