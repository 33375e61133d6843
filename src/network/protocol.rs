//! RethinkDB wire protocol framing.
//!
//! Every request and response after the handshake is one frame:
//!
//! ```text
//! [token: u64 LE][length: u32 LE][length bytes of UTF-8 JSON]
//! ```
//!
//! A request body is the JSON array `[query_type, term?, global_optargs?]`;
//! a response body is the object `{t, r, b?, p?, e?, n?}`.

use crate::error::{QueryError, ReqlError, Result, RuntimeErrorKind};
use crate::reql::{QueryType, ResponseNote, ResponseType, Term};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version constants
pub const VERSION_V0_4: u32 = 0x400c2d20;
pub const VERSION_V1_0: u32 = 0x34c2bdc3;

/// Wire protocol constant (JSON is the only one still spoken)
pub const PROTOCOL_JSON: u32 = 0x7e6970c7;

/// Size limits
pub const HEADER_SIZE: usize = 12;
pub const MAX_MESSAGE_SIZE: u32 = 256 * 1024 * 1024; // 256 MB

/// Handshake protocol versions this driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v0_4")]
    V0_4,
    #[default]
    #[serde(rename = "v1_0")]
    V1_0,
}

impl ProtocolVersion {
    pub fn from_magic(magic: u32) -> Result<Self> {
        match magic {
            VERSION_V0_4 => Ok(ProtocolVersion::V0_4),
            VERSION_V1_0 => Ok(ProtocolVersion::V1_0),
            _ => Err(ReqlError::driver(format!(
                "Unsupported protocol version: 0x{:x}",
                magic
            ))),
        }
    }

    pub fn to_magic(self) -> u32 {
        match self {
            ProtocolVersion::V0_4 => VERSION_V0_4,
            ProtocolVersion::V1_0 => VERSION_V1_0,
        }
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = ReqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v0_4" | "0.4" => Ok(ProtocolVersion::V0_4),
            "v1_0" | "1.0" => Ok(ProtocolVersion::V1_0),
            other => Err(ReqlError::driver(format!(
                "Unknown handshake version: {}",
                other
            ))),
        }
    }
}

/// One step of a backtrace: a positional argument index or an optarg key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frame {
    Pos(usize),
    Opt(String),
}

impl Frame {
    pub fn from_value(value: &Value) -> Result<Frame> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|pos| Frame::Pos(pos as usize))
                .ok_or_else(|| ReqlError::driver(format!("Invalid backtrace frame: {}", value))),
            Value::String(key) => Ok(Frame::Opt(key.clone())),
            other => Err(ReqlError::driver(format!(
                "Invalid backtrace frame: {}",
                other
            ))),
        }
    }
}

/// Request envelope, created per call.
#[derive(Debug, Clone)]
pub struct Query {
    pub token: u64,
    pub query_type: QueryType,
    pub term: Option<Arc<Term>>,
    pub global_optargs: BTreeMap<String, Term>,
}

impl Query {
    pub fn start(token: u64, term: Arc<Term>, global_optargs: BTreeMap<String, Term>) -> Self {
        Self {
            token,
            query_type: QueryType::Start,
            term: Some(term),
            global_optargs,
        }
    }

    /// A query that carries nothing but its type and token
    /// (CONTINUE, STOP, NOREPLY_WAIT, SERVER_INFO).
    pub fn control(token: u64, query_type: QueryType) -> Self {
        Self {
            token,
            query_type,
            term: None,
            global_optargs: BTreeMap::new(),
        }
    }

    /// JSON body, trailing elements omitted when absent.
    pub fn body(&self) -> Value {
        let mut body = vec![Value::from(self.query_type.as_u64())];
        if let Some(term) = &self.term {
            body.push(term.build());
        }
        if !self.global_optargs.is_empty() {
            let optargs: Map<String, Value> = self
                .global_optargs
                .iter()
                .map(|(k, v)| (k.clone(), v.build()))
                .collect();
            body.push(Value::Object(optargs));
        }
        Value::Array(body)
    }

    /// Complete frame, ready to be written in one piece.
    pub fn serialize(&self) -> Result<Bytes> {
        let non_finite = self.term.as_deref().is_some_and(Term::has_non_finite)
            || self.global_optargs.values().any(Term::has_non_finite);
        if non_finite {
            return Err(ReqlError::driver(
                "Cannot send a query containing a non-finite number (NaN or infinity).",
            ));
        }
        let body = serde_json::to_vec(&self.body())?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_MESSAGE_SIZE)
            .ok_or_else(|| {
                ReqlError::driver(format!(
                    "Query too large: {} bytes (max: {})",
                    body.len(),
                    MAX_MESSAGE_SIZE
                ))
            })?;

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
        frame.put_u64_le(self.token);
        frame.put_u32_le(len);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }
}

/// A decoded response frame.
#[derive(Debug, Clone)]
pub struct Response {
    pub token: u64,
    pub response_type: ResponseType,
    pub data: Vec<Value>,
    pub backtrace: Vec<Frame>,
    pub profile: Option<Value>,
    pub error_code: Option<i64>,
    pub notes: Vec<ResponseNote>,
}

#[derive(Deserialize)]
struct RawResponse {
    t: u64,
    #[serde(default)]
    r: Vec<Value>,
    #[serde(default)]
    b: Vec<Value>,
    #[serde(default)]
    p: Option<Value>,
    #[serde(default)]
    e: Option<i64>,
    #[serde(default)]
    n: Vec<u64>,
}

impl Response {
    pub fn parse(token: u64, body: &[u8]) -> Result<Self> {
        let raw: RawResponse = serde_json::from_slice(body)?;
        let response_type = ResponseType::from_code(raw.t)
            .ok_or_else(|| ReqlError::driver(format!("Unknown response type {}.", raw.t)))?;
        let backtrace = raw
            .b
            .iter()
            .map(Frame::from_value)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            token,
            response_type,
            data: raw.r,
            backtrace,
            profile: raw.p,
            error_code: raw.e,
            notes: raw.n.into_iter().filter_map(ResponseNote::from_code).collect(),
        })
    }

    pub fn is_feed(&self) -> bool {
        self.notes.iter().any(ResponseNote::is_feed)
    }

    /// Builds the error for an error response, attaching the query that failed.
    pub fn make_error(&self, term: Option<Arc<Term>>) -> ReqlError {
        let message = match self.data.first() {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => String::from("Unknown error"),
        };
        let error = QueryError::new(message, term, self.backtrace.clone());

        match self.response_type {
            ResponseType::ClientError => ReqlError::Client(error),
            ResponseType::CompileError => ReqlError::Compile(error),
            ResponseType::RuntimeError => ReqlError::Runtime {
                kind: RuntimeErrorKind::from_code(self.error_code.unwrap_or_default()),
                error,
            },
            other => ReqlError::driver(format!(
                "Unknown Response type {} encountered in a response.",
                other.as_u64()
            )),
        }
    }
}

/// Read exactly one response frame.
pub async fn read_response<T>(stream: &mut T) -> Result<Response>
where
    T: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let mut token = [0u8; 8];
    token.copy_from_slice(&header[..8]);
    let token = u64::from_le_bytes(token);
    let mut size = [0u8; 4];
    size.copy_from_slice(&header[8..]);
    let size = u32::from_le_bytes(size);

    if size > MAX_MESSAGE_SIZE {
        return Err(ReqlError::driver(format!(
            "Response too large: {} bytes (max: {})",
            size, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; size as usize];
    stream.read_exact(&mut buffer).await?;

    Response::parse(token, &buffer)
}

/// Write one serialized frame and flush it.
pub async fn write_frame<T>(stream: &mut T, frame: &[u8]) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}
