//! SCRAM-SHA-256 client authentication (RFC 5802 / RFC 7677)
//!
//! The V1_0 handshake authenticates with a single SCRAM exchange:
//!
//! ```text
//! client-first   n,,n=<user>,r=<client nonce>
//! server-first   r=<client nonce + server nonce>,s=<salt>,i=<iterations>
//! client-final   c=biws,r=<nonce>,p=<proof>
//! server-final   v=<server signature>
//! ```

use crate::error::{ReqlError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 18;

/// Derived `SaltedPassword` values keyed by (password, salt, iterations).
///
/// A connection keeps one of these across reconnects, so only the first
/// handshake pays for the key derivation.
#[derive(Debug, Default)]
pub struct Pbkdf2Cache {
    entries: Mutex<HashMap<(String, Vec<u8>, u32), [u8; 32]>>,
}

impl Pbkdf2Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn salted_password(&self, password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
        let key = (password.to_string(), salt.to_vec(), iterations);
        if let Some(hit) = self.entries.lock().get(&key) {
            return *hit;
        }

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted);
        self.entries.lock().insert(key, salted);
        salted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `saslname` escaping for the `n=` attribute.
pub fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

/// Fresh random client nonce, base64 of 18 random bytes.
pub fn client_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

fn hmac(key: &[u8], message: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ReqlError::driver(format!("HMAC key rejected: {}", e)))?;
    mac.update(message);
    Ok(mac)
}

/// Parsed `server-first-message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirst {
    pub nonce: String,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

impl ServerFirst {
    pub fn parse(message: &str) -> Result<Self> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in message.split(',') {
            match attr.split_once('=') {
                Some(("r", value)) => nonce = Some(value.to_string()),
                Some(("s", value)) => {
                    salt = Some(STANDARD.decode(value).map_err(|e| {
                        ReqlError::driver(format!("Invalid salt from server: {}", e))
                    })?)
                }
                Some(("i", value)) => {
                    iterations = Some(value.parse::<u32>().map_err(|_| {
                        ReqlError::driver(format!("Invalid iteration count from server: {}", value))
                    })?)
                }
                _ => {}
            }
        }

        match (nonce, salt, iterations) {
            (Some(nonce), Some(salt), Some(iterations)) => Ok(Self {
                nonce,
                salt,
                iterations,
            }),
            _ => Err(ReqlError::driver(format!(
                "Incomplete server-first message: {}",
                message
            ))),
        }
    }
}

/// Expected `ServerSignature`, kept from the client-final step until the
/// server's final message arrives.
#[derive(Clone)]
pub struct ServerSignature {
    mac: HmacSha256,
}

impl ServerSignature {
    /// Constant-time check of the base64 `v=` value from the server.
    pub fn verify(&self, encoded: &str) -> Result<()> {
        let invalid = || ReqlError::Auth("Invalid server signature".to_string());
        let signature = STANDARD.decode(encoded).map_err(|_| invalid())?;
        self.mac.clone().verify_slice(&signature).map_err(|_| invalid())
    }
}

impl std::fmt::Debug for ServerSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServerSignature(..)")
    }
}

/// Client half of one SCRAM-SHA-256 exchange.
#[derive(Debug, Clone)]
pub struct ScramClient {
    user: String,
    password: String,
    nonce: String,
    cache: Arc<Pbkdf2Cache>,
}

impl ScramClient {
    pub fn new(user: &str, password: &str, nonce: String, cache: Arc<Pbkdf2Cache>) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            nonce,
            cache,
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.user), self.nonce)
    }

    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Computes the `client-final-message` for `server_first` and the
    /// signature the server must answer with.
    pub fn client_final(&self, server_first: &str) -> Result<(String, ServerSignature)> {
        let parsed = ServerFirst::parse(server_first)?;
        if !parsed.nonce.starts_with(&self.nonce) {
            return Err(ReqlError::Auth("Invalid nonce from server".to_string()));
        }

        let salted = self
            .cache
            .salted_password(&self.password, &parsed.salt, parsed.iterations);

        let client_key = hmac(&salted, b"Client Key")?.finalize().into_bytes();
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c=biws,r={}", parsed.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?
            .finalize()
            .into_bytes();
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted, b"Server Key")?.finalize().into_bytes();
        let signature = ServerSignature {
            mac: hmac(&server_key, auth_message.as_bytes())?,
        };

        Ok((
            format!("{},p={}", without_proof, STANDARD.encode(proof)),
            signature,
        ))
    }
}
