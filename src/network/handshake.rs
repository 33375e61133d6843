//! Connection handshakes.
//!
//! A handshake is a pure state machine: given the server's previous reply it
//! produces the next bytes to send. [`perform_handshake`] pumps one over a
//! stream. Two protocol versions are spoken:
//!
//! - **V0_4**: `[version][key_len][key][protocol]`, answered by `SUCCESS\0`.
//! - **V1_0**: `\0`-terminated JSON messages carrying a SCRAM-SHA-256 exchange.

use super::auth::{client_nonce, Pbkdf2Cache, ScramClient, ServerSignature};
use super::protocol::{PROTOCOL_JSON, VERSION_V0_4, VERSION_V1_0};
use crate::error::{ReqlError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest handshake reply accepted before giving up on the terminator.
pub const MAX_HANDSHAKE_REPLY: usize = 16 * 1024;

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Write these bytes, then read the server's reply.
    Send(Vec<u8>),
    /// Read another reply without sending anything first.
    Await,
    /// Authentication succeeded.
    Done,
}

pub trait Handshake: Send {
    /// Back to the initial state, ready for a fresh connection attempt.
    fn reset(&mut self);

    /// Consumes the previous server reply (`None` only on the first call).
    fn next_message(&mut self, response: Option<&[u8]>) -> Result<HandshakeStep>;
}

fn unexpected_call(state: u8) -> ReqlError {
    ReqlError::driver(format!("Unexpected handshake call in state {}.", state))
}

/// Server text, best-effort UTF-8.
fn describe_reply(reply: &[u8]) -> String {
    match std::str::from_utf8(reply) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{:?}", reply),
    }
}

/// Token-authenticated handshake of protocol V0_4.
#[derive(Debug, Clone)]
pub struct HandshakeV0_4 {
    auth_key: String,
    state: u8,
}

impl HandshakeV0_4 {
    pub fn new(auth_key: impl Into<String>) -> Self {
        Self {
            auth_key: auth_key.into(),
            state: 0,
        }
    }
}

impl Handshake for HandshakeV0_4 {
    fn reset(&mut self) {
        self.state = 0;
    }

    fn next_message(&mut self, response: Option<&[u8]>) -> Result<HandshakeStep> {
        match (self.state, response) {
            (0, None) => {
                let key = self.auth_key.as_bytes();
                let mut message = Vec::with_capacity(12 + key.len());
                message.extend_from_slice(&VERSION_V0_4.to_le_bytes());
                message.extend_from_slice(&(key.len() as u32).to_le_bytes());
                message.extend_from_slice(key);
                message.extend_from_slice(&PROTOCOL_JSON.to_le_bytes());
                self.state = 1;
                Ok(HandshakeStep::Send(message))
            }
            (1, Some(reply)) => {
                if reply == b"SUCCESS" {
                    self.state = 2;
                    return Ok(HandshakeStep::Done);
                }
                let text = describe_reply(reply);
                if text.starts_with("ERROR: Incorrect authorization key") {
                    Err(ReqlError::Auth("Incorrect authorization key.".to_string()))
                } else {
                    Err(ReqlError::driver(format!(
                        "Server dropped connection with message: \"{}\"",
                        text.trim()
                    )))
                }
            }
            (state, _) => Err(unexpected_call(state)),
        }
    }
}

/// SCRAM-SHA-256 handshake of protocol V1_0.
#[derive(Debug)]
pub struct HandshakeV1_0 {
    user: String,
    password: String,
    cache: Arc<Pbkdf2Cache>,
    fixed_nonce: Option<String>,
    state: u8,
    scram: Option<ScramClient>,
    signature: Option<ServerSignature>,
}

impl HandshakeV1_0 {
    pub const PROTOCOL_VERSION: i64 = 0;

    pub fn new(user: impl Into<String>, password: impl Into<String>, cache: Arc<Pbkdf2Cache>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            cache,
            fixed_nonce: None,
            state: 0,
            scram: None,
            signature: None,
        }
    }

    /// Uses `nonce` instead of a random one. Only useful for known-answer tests.
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.fixed_nonce = Some(nonce.into());
        self
    }

    fn parse_reply(reply: &[u8]) -> Result<Value> {
        let value: Value = serde_json::from_slice(reply).map_err(|_| {
            ReqlError::driver(format!(
                "Received an unexpected handshake reply: {}",
                describe_reply(reply)
            ))
        })?;

        if value.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(value);
        }

        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Handshake failed without an error message")
            .to_string();
        match value.get("error_code").and_then(Value::as_i64) {
            Some(10..=20) => Err(ReqlError::Auth(message)),
            _ => Err(ReqlError::Driver(message)),
        }
    }

    fn authentication(reply: &Value) -> Result<&str> {
        reply
            .get("authentication")
            .and_then(Value::as_str)
            .ok_or_else(|| ReqlError::driver("Handshake reply is missing `authentication`."))
    }

    fn json_message(value: Value) -> Result<Vec<u8>> {
        let mut message = serde_json::to_vec(&value)?;
        message.push(0);
        Ok(message)
    }
}

impl Handshake for HandshakeV1_0 {
    fn reset(&mut self) {
        self.state = 0;
        self.scram = None;
        self.signature = None;
    }

    fn next_message(&mut self, response: Option<&[u8]>) -> Result<HandshakeStep> {
        match (self.state, response) {
            (0, None) => {
                let nonce = self.fixed_nonce.clone().unwrap_or_else(client_nonce);
                let scram = ScramClient::new(&self.user, &self.password, nonce, self.cache.clone());

                let mut message = VERSION_V1_0.to_le_bytes().to_vec();
                message.extend(Self::json_message(json!({
                    "protocol_version": Self::PROTOCOL_VERSION,
                    "authentication_method": "SCRAM-SHA-256",
                    "authentication": scram.client_first(),
                }))?);

                self.scram = Some(scram);
                self.state = 1;
                Ok(HandshakeStep::Send(message))
            }
            (1, Some(reply)) => {
                if reply.starts_with(b"ERROR") {
                    return Err(ReqlError::driver(
                        "Received an unexpected reply. You may be attempting to connect to \
                         a RethinkDB server that is too old for this driver. The minimum \
                         supported server version is 2.3.0.",
                    ));
                }
                let reply = Self::parse_reply(reply)?;
                let min = reply.get("min_protocol_version").and_then(Value::as_i64).unwrap_or(0);
                let max = reply.get("max_protocol_version").and_then(Value::as_i64).unwrap_or(0);
                if !(min..=max).contains(&Self::PROTOCOL_VERSION) {
                    return Err(ReqlError::driver(format!(
                        "Unsupported protocol version {}, expected between {} and {}",
                        Self::PROTOCOL_VERSION,
                        min,
                        max
                    )));
                }
                self.state = 2;
                Ok(HandshakeStep::Await)
            }
            (2, Some(reply)) => {
                let reply = Self::parse_reply(reply)?;
                let server_first = Self::authentication(&reply)?;
                let scram = self.scram.as_ref().ok_or_else(|| unexpected_call(2))?;
                let (client_final, signature) = scram.client_final(server_first)?;

                self.signature = Some(signature);
                self.state = 3;
                Ok(HandshakeStep::Send(Self::json_message(
                    json!({ "authentication": client_final }),
                )?))
            }
            (3, Some(reply)) => {
                let reply = Self::parse_reply(reply)?;
                let server_final = Self::authentication(&reply)?;
                let encoded = server_final
                    .split(',')
                    .find_map(|attr| attr.strip_prefix("v="))
                    .ok_or_else(|| ReqlError::Auth("Invalid server signature".to_string()))?;
                let signature = self.signature.as_ref().ok_or_else(|| unexpected_call(3))?;
                signature.verify(encoded)?;

                self.state = 4;
                Ok(HandshakeStep::Done)
            }
            (state, _) => Err(unexpected_call(state)),
        }
    }
}

async fn read_reply<T>(stream: &mut T) -> Result<Vec<u8>>
where
    T: AsyncRead + Unpin,
{
    let mut reply = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == 0 {
            return Ok(reply);
        }
        reply.push(byte);
        if reply.len() > MAX_HANDSHAKE_REPLY {
            return Err(ReqlError::driver("Handshake response too long"));
        }
    }
}

/// Runs `handshake` to completion over `stream`.
pub async fn perform_handshake<T>(stream: &mut T, handshake: &mut dyn Handshake) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    handshake.reset();
    let mut reply: Option<Vec<u8>> = None;
    loop {
        match handshake.next_message(reply.as_deref())? {
            HandshakeStep::Send(bytes) => {
                stream.write_all(&bytes).await?;
                stream.flush().await?;
                reply = Some(read_reply(stream).await?);
            }
            HandshakeStep::Await => reply = Some(read_reply(stream).await?),
            HandshakeStep::Done => {
                tracing::debug!("Handshake complete");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    fn reply(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_v0_4_first_message() {
        let mut handshake = HandshakeV0_4::new("secret");
        let step = handshake.next_message(None).unwrap();
        let HandshakeStep::Send(bytes) = step else {
            panic!("expected bytes to send");
        };
        assert_eq!(&bytes[..4], &VERSION_V0_4.to_le_bytes());
        assert_eq!(&bytes[4..8], &6u32.to_le_bytes());
        assert_eq!(&bytes[8..14], b"secret");
        assert_eq!(&bytes[14..], &PROTOCOL_JSON.to_le_bytes());

        assert_eq!(handshake.next_message(Some(b"SUCCESS")).unwrap(), HandshakeStep::Done);
    }

    #[test]
    fn test_v0_4_replies() {
        let mut handshake = HandshakeV0_4::new("");
        handshake.next_message(None).unwrap();
        let err = handshake
            .next_message(Some(b"ERROR: Incorrect authorization key.\n"))
            .unwrap_err();
        assert!(matches!(err, ReqlError::Auth(_)));

        handshake.reset();
        handshake.next_message(None).unwrap();
        let err = handshake.next_message(Some(b"ERROR: go away")).unwrap_err();
        assert!(matches!(err, ReqlError::Driver(_)));
        assert!(err.to_string().contains("go away"));
    }

    #[test]
    fn test_v0_4_call_order() {
        let mut handshake = HandshakeV0_4::new("");
        assert!(handshake.next_message(Some(b"SUCCESS")).is_err());
        handshake.next_message(None).unwrap();
        assert!(handshake.next_message(None).is_err());
    }

    #[test]
    fn test_v1_0_full_exchange() {
        let cache = Arc::new(Pbkdf2Cache::new());
        let mut handshake = HandshakeV1_0::new("user", "pencil", cache).with_nonce(NONCE);

        let HandshakeStep::Send(first) = handshake.next_message(None).unwrap() else {
            panic!("expected client-first");
        };
        assert_eq!(&first[..4], &VERSION_V1_0.to_le_bytes());
        assert_eq!(first.last(), Some(&0));
        let body: Value = serde_json::from_slice(&first[4..first.len() - 1]).unwrap();
        assert_eq!(body["authentication_method"], "SCRAM-SHA-256");
        assert_eq!(body["authentication"], "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let version = reply(json!({"success": true, "min_protocol_version": 0, "max_protocol_version": 0, "server_version": "2.4.0"}));
        assert_eq!(handshake.next_message(Some(&version)).unwrap(), HandshakeStep::Await);

        let server_first = reply(json!({"success": true, "authentication": SERVER_FIRST}));
        let HandshakeStep::Send(final_msg) = handshake.next_message(Some(&server_first)).unwrap() else {
            panic!("expected client-final");
        };
        let body: Value = serde_json::from_slice(&final_msg[..final_msg.len() - 1]).unwrap();
        assert!(body["authentication"]
            .as_str()
            .unwrap()
            .ends_with(",p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="));

        let server_final = reply(json!({"success": true, "authentication": "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="}));
        assert_eq!(handshake.next_message(Some(&server_final)).unwrap(), HandshakeStep::Done);
    }

    #[test]
    fn test_v1_0_error_codes() {
        let mut handshake = HandshakeV1_0::new("admin", "wrong", Arc::new(Pbkdf2Cache::new()));
        handshake.next_message(None).unwrap();
        let denied = reply(json!({"success": false, "error": "Wrong password", "error_code": 12}));
        assert!(matches!(handshake.next_message(Some(&denied)), Err(ReqlError::Auth(_))));

        handshake.reset();
        handshake.next_message(None).unwrap();
        let other = reply(json!({"success": false, "error": "Oops", "error_code": 3}));
        assert!(matches!(handshake.next_message(Some(&other)), Err(ReqlError::Driver(_))));
    }

    #[test]
    fn test_v1_0_old_server() {
        let mut handshake = HandshakeV1_0::new("admin", "", Arc::new(Pbkdf2Cache::new()));
        handshake.next_message(None).unwrap();
        let err = handshake
            .next_message(Some(b"ERROR: Received an unsupported protocol version."))
            .unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn test_v1_0_protocol_range() {
        let mut handshake = HandshakeV1_0::new("admin", "", Arc::new(Pbkdf2Cache::new()));
        handshake.next_message(None).unwrap();
        let version = reply(json!({"success": true, "min_protocol_version": 1, "max_protocol_version": 2}));
        assert!(matches!(handshake.next_message(Some(&version)), Err(ReqlError::Driver(_))));
    }

    #[test]
    fn test_v1_0_bad_signature() {
        let mut handshake =
            HandshakeV1_0::new("user", "pencil", Arc::new(Pbkdf2Cache::new())).with_nonce(NONCE);
        handshake.next_message(None).unwrap();
        handshake
            .next_message(Some(&reply(json!({"success": true, "min_protocol_version": 0, "max_protocol_version": 0}))))
            .unwrap();
        handshake
            .next_message(Some(&reply(json!({"success": true, "authentication": SERVER_FIRST}))))
            .unwrap();
        let forged = reply(json!({"success": true, "authentication": "v=AAAA"}));
        assert!(matches!(handshake.next_message(Some(&forged)), Err(ReqlError::Auth(_))));
    }

    #[tokio::test]
    async fn test_perform_handshake_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let mut header = [0u8; 8];
            server.read_exact(&mut header).await.unwrap();
            let key_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
            let mut rest = vec![0u8; key_len + 4];
            server.read_exact(&mut rest).await.unwrap();
            server.write_all(b"SUCCESS\0").await.unwrap();
            rest[..key_len].to_vec()
        });

        let mut handshake = HandshakeV0_4::new("k3y");
        perform_handshake(&mut client, &mut handshake).await.unwrap();
        assert_eq!(server_task.await.unwrap(), b"k3y");
    }
}
