//! Client connection: handshake, token multiplexing and demultiplexing.
//!
//! One socket carries any number of concurrently outstanding queries. Each
//! query gets a fresh token; responses come back tagged with the token and in
//! any order.
//!
//! # Architecture
//!
//! ```text
//! caller ──submit──► Session ──frames──► writer task ──► socket
//!    ▲                  │                                   │
//!    │              waiters/cursors ◄──── reader task ◄─────┘
//!    └── PendingResponse / Cursor
//! ```
//!
//! A `Session` lives for one socket. The writer task is the only place frames
//! are written, so frames never interleave. The reader task is the only place
//! frames are read, and it routes each response to the waiter or cursor
//! registered for its token.
//!
//! # Lifecycle
//!
//! `Disconnected -> Handshaking -> Open -> Closing -> Closed`. A response
//! for a token nobody is waiting on while `Open` is a protocol violation and
//! fails every outstanding query with the same error.

use super::auth::Pbkdf2Cache;
use super::cursor::{Cursor, CursorShared};
use super::handshake::perform_handshake;
use super::protocol::{read_response, write_frame, Query, Response};
use super::transport::{BoxedStream, ConnectionOptions, Connector, TcpConnector};
use crate::error::{ReqlError, Result};
use crate::reql::codec::{self, FormatOptions, PseudoFormat};
use crate::reql::{Datum, QueryType, ResponseType, Term};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Per-query options, sent to the server as global optargs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Database for tables that don't name one. Falls back to the
    /// connection's default database.
    pub db: Option<String>,
    /// Don't wait for (or expect) a reply.
    pub noreply: bool,
    /// Ask the server for a query profile.
    pub profile: bool,
    /// `hard` or `soft`
    pub durability: Option<String>,
    /// `single`, `majority` or `outdated`
    pub read_mode: Option<String>,
    pub array_limit: Option<u64>,
    /// How TIME, GROUPED_DATA and BINARY values are returned.
    pub format: FormatOptions,
    /// Any other global optarg.
    pub extra: BTreeMap<String, Term>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn noreply(mut self, noreply: bool) -> Self {
        self.noreply = noreply;
        self
    }

    pub fn profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }

    pub fn optarg(mut self, name: impl Into<String>, value: Term) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    fn global_optargs(&self, default_db: Option<&str>) -> BTreeMap<String, Term> {
        let mut optargs = self.extra.clone();
        let text = |s: &str| Term::datum(Datum::from(s));

        if let Some(db) = self.db.as_deref().or(default_db) {
            optargs.insert("db".to_string(), Term::db(db));
        }
        if self.noreply {
            optargs.insert("noreply".to_string(), Term::datum(Datum::Boolean(true)));
        }
        if self.profile {
            optargs.insert("profile".to_string(), Term::datum(Datum::Boolean(true)));
        }
        if let Some(durability) = &self.durability {
            optargs.insert("durability".to_string(), text(durability));
        }
        if let Some(read_mode) = &self.read_mode {
            optargs.insert("read_mode".to_string(), text(read_mode));
        }
        if let Some(limit) = self.array_limit {
            optargs.insert("array_limit".to_string(), Term::datum(Datum::from(limit)));
        }
        let formats = [
            ("time_format", self.format.time_format),
            ("group_format", self.format.group_format),
            ("binary_format", self.format.binary_format),
        ];
        for (name, format) in formats {
            if format == PseudoFormat::Raw {
                optargs.insert(name.to_string(), text(format.as_str()));
            }
        }
        optargs
    }
}

/// Result of a query.
#[derive(Debug)]
pub enum QueryOutput {
    /// A single value. With `profile`, `{"value": .., "profile": ..}`.
    Atom(Datum),
    /// A stream of values.
    Cursor(Cursor),
    ServerInfo(Datum),
    /// Answer to NOREPLY_WAIT
    WaitComplete,
    /// The query was sent with `noreply`.
    NoReply,
}

impl QueryOutput {
    pub fn into_atom(self) -> Result<Datum> {
        match self {
            QueryOutput::Atom(datum) | QueryOutput::ServerInfo(datum) => Ok(datum),
            other => Err(ReqlError::driver(format!(
                "Expected a single value, got {}",
                other.kind()
            ))),
        }
    }

    pub fn into_cursor(self) -> Result<Cursor> {
        match self {
            QueryOutput::Cursor(cursor) => Ok(cursor),
            other => Err(ReqlError::driver(format!(
                "Expected a cursor, got {}",
                other.kind()
            ))),
        }
    }

    /// Atoms as-is, sequences drained into an array.
    pub async fn into_datum(self) -> Result<Datum> {
        match self {
            QueryOutput::Cursor(cursor) => cursor.collect().await.map(Datum::Array),
            other => other.into_atom(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            QueryOutput::Atom(_) => "an atom",
            QueryOutput::Cursor(_) => "a cursor",
            QueryOutput::ServerInfo(_) => "server info",
            QueryOutput::WaitComplete => "wait complete",
            QueryOutput::NoReply => "no reply",
        }
    }
}

/// What the demultiplexer hands a single-shot waiter.
#[derive(Debug)]
enum Reply {
    Atom(Response),
    Cursor(Arc<CursorShared>),
    ServerInfo(Response),
    WaitComplete,
}

#[derive(Debug)]
struct PendingQuery {
    term: Option<Arc<Term>>,
    format: FormatOptions,
    tx: oneshot::Sender<Result<Reply>>,
}

#[derive(Debug)]
enum PendingState {
    Waiting(oneshot::Receiver<Result<Reply>>),
    NoReply,
    Consumed,
}

/// A submitted query whose reply has not been collected yet.
#[derive(Debug)]
pub struct PendingResponse {
    token: u64,
    format: FormatOptions,
    state: PendingState,
}

impl PendingResponse {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Waits for the reply. A timeout leaves the query registered, so `wait`
    /// may be called again.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<QueryOutput> {
        if matches!(self.state, PendingState::NoReply) {
            self.state = PendingState::Consumed;
            return Ok(QueryOutput::NoReply);
        }
        let rx = match &mut self.state {
            PendingState::Waiting(rx) => rx,
            _ => return Err(ReqlError::driver("Response was already consumed.")),
        };

        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| ReqlError::timeout())?,
            None => rx.await,
        };
        self.state = PendingState::Consumed;

        match received.map_err(|_| ReqlError::connection_closed())?? {
            Reply::Atom(response) => {
                let value = response.data.into_iter().next().unwrap_or(Value::Null);
                let value = codec::decode(value, &self.format)?;
                match response.profile {
                    Some(profile) => {
                        let mut wrapped = BTreeMap::new();
                        wrapped.insert("value".to_string(), value);
                        wrapped.insert("profile".to_string(), codec::decode(profile, &self.format)?);
                        Ok(QueryOutput::Atom(Datum::Object(wrapped)))
                    }
                    None => Ok(QueryOutput::Atom(value)),
                }
            }
            Reply::Cursor(shared) => Ok(QueryOutput::Cursor(Cursor::new(shared))),
            Reply::ServerInfo(response) => {
                let value = response.data.into_iter().next().unwrap_or(Value::Null);
                Ok(QueryOutput::ServerInfo(codec::decode(value, &FormatOptions::raw())?))
            }
            Reply::WaitComplete => Ok(QueryOutput::WaitComplete),
        }
    }
}

impl Drop for PendingResponse {
    /// A stream that was already delivered but never picked up still holds
    /// a server-side cursor open; stop it. Replies arriving after the
    /// receiver closes are handled by `Session::resolve`.
    fn drop(&mut self) {
        if let PendingState::Waiting(rx) = &mut self.state {
            rx.close();
            if let Ok(Ok(Reply::Cursor(cursor))) = rx.try_recv() {
                tracing::debug!(token = self.token, "Pending stream dropped, closing cursor");
                cursor.close();
            }
        }
    }
}

#[derive(Debug)]
struct SessionState {
    status: ConnectionStatus,
    waiters: HashMap<u64, PendingQuery>,
    cursors: HashMap<u64, Arc<CursorShared>>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
}

enum Route {
    Cursor(Arc<CursorShared>),
    Waiter(PendingQuery),
    Ignore,
    Unknown,
}

/// One authenticated socket and everything in flight on it.
///
/// Lock order: a cursor's lock may be held while taking the session lock,
/// never the other way around.
#[derive(Debug)]
pub(crate) struct Session {
    state: Mutex<SessionState>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn start(stream: BoxedStream) -> Arc<Session> {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        let session = Arc::new(Session {
            state: Mutex::new(SessionState {
                status: ConnectionStatus::Open,
                waiters: HashMap::new(),
                cursors: HashMap::new(),
                outbound: Some(tx),
            }),
            reader: Mutex::new(None),
        });

        tokio::spawn(write_loop(writer, rx, Arc::downgrade(&session)));
        let reader = tokio::spawn(read_loop(reader, session.clone()));
        *session.reader.lock() = Some(reader);
        session
    }

    fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub(crate) fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Registers `pending` under the query's token and queues the frame.
    fn enqueue(&self, query: &Query, pending: Option<PendingQuery>, allow_closing: bool) -> Result<()> {
        let frame = query.serialize()?;
        let mut state = self.state.lock();
        let admitted = match state.status {
            ConnectionStatus::Open => true,
            ConnectionStatus::Closing => allow_closing,
            _ => false,
        };
        if !admitted {
            return Err(ReqlError::connection_closed());
        }
        let outbound = state
            .outbound
            .clone()
            .ok_or_else(ReqlError::connection_closed)?;

        if let Some(pending) = pending {
            state.waiters.insert(query.token, pending);
        }
        if outbound.send(frame).is_err() {
            state.waiters.remove(&query.token);
            return Err(ReqlError::connection_closed());
        }
        tracing::trace!(token = query.token, query_type = ?query.query_type, "Query queued");
        Ok(())
    }

    /// CONTINUE or STOP for a cursor's token. Allowed while closing so the
    /// server can wind the stream down.
    pub(crate) fn send_control(&self, token: u64, query_type: QueryType) -> Result<()> {
        self.enqueue(&Query::control(token, query_type), None, true)
    }

    pub(crate) fn forget_cursor(&self, token: u64) {
        self.state.lock().cursors.remove(&token);
    }

    fn dispatch(self: &Arc<Self>, response: Response) -> Result<()> {
        let token = response.token;
        let route = {
            let mut state = self.state.lock();
            if let Some(cursor) = state.cursors.get(&token) {
                Route::Cursor(cursor.clone())
            } else if let Some(pending) = state.waiters.remove(&token) {
                Route::Waiter(pending)
            } else if state.status != ConnectionStatus::Open {
                Route::Ignore
            } else {
                Route::Unknown
            }
        };

        match route {
            Route::Cursor(cursor) => {
                tracing::trace!(token, "Routing response to cursor");
                cursor.extend(response);
                Ok(())
            }
            Route::Waiter(pending) => {
                tracing::trace!(token, response_type = ?response.response_type, "Resolving query");
                self.resolve(pending, response);
                Ok(())
            }
            Route::Ignore => {
                tracing::debug!(token, "Dropping response received while closing");
                Ok(())
            }
            Route::Unknown => Err(ReqlError::driver("Unexpected response received.")),
        }
    }

    fn resolve(self: &Arc<Self>, pending: PendingQuery, response: Response) {
        let token = response.token;
        let reply = match response.response_type {
            ResponseType::SuccessAtom => Ok(Reply::Atom(response)),
            ResponseType::SuccessPartial | ResponseType::SuccessSequence => {
                let cursor = CursorShared::new(
                    token,
                    pending.term.clone(),
                    pending.format,
                    &response,
                    Arc::downgrade(self),
                );
                if response.response_type == ResponseType::SuccessPartial {
                    self.state.lock().cursors.insert(token, cursor.clone());
                }
                cursor.extend(response);
                Ok(Reply::Cursor(cursor))
            }
            ResponseType::WaitComplete => Ok(Reply::WaitComplete),
            ResponseType::ServerInfo => Ok(Reply::ServerInfo(response)),
            _ => Err(response.make_error(pending.term.clone())),
        };

        if let Err(Ok(Reply::Cursor(cursor))) = pending.tx.send(reply) {
            tracing::debug!(token, "Query abandoned by its caller, closing cursor");
            cursor.close();
        }
    }

    /// Stops admitting queries and fails every live cursor. Returns false if
    /// the session was already closing.
    fn begin_closing(&self) -> bool {
        let cursors = {
            let mut state = self.state.lock();
            if state.status != ConnectionStatus::Open {
                return false;
            }
            state.status = ConnectionStatus::Closing;
            std::mem::take(&mut state.cursors)
        };
        for cursor in cursors.into_values() {
            cursor.abort(ReqlError::connection_closed());
        }
        true
    }

    /// Fails everything still in flight with `error` and releases the socket.
    fn shutdown(&self, error: ReqlError) {
        let (waiters, cursors) = {
            let mut state = self.state.lock();
            if state.status == ConnectionStatus::Closed {
                return;
            }
            state.status = ConnectionStatus::Closed;
            state.outbound = None;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.cursors),
            )
        };

        for (_, pending) in waiters {
            let _ = pending.tx.send(Err(error.clone()));
        }
        for cursor in cursors.into_values() {
            cursor.abort(error.clone());
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    session: Weak<Session>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::error!(error = %e, "Failed to write frame");
            if let Some(session) = session.upgrade() {
                session.shutdown(e);
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: ReadHalf<BoxedStream>, session: Arc<Session>) {
    loop {
        let result = match read_response(&mut reader).await {
            Ok(response) => session.dispatch(response),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if session.status() == ConnectionStatus::Open {
                tracing::error!(error = %e, "Connection failed");
            } else {
                tracing::debug!(error = %e, "Reader stopped");
            }
            session.shutdown(e);
            return;
        }
    }
}

/// A connection to a RethinkDB server.
pub struct Connection {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    cache: Arc<Pbkdf2Cache>,
    next_token: AtomicU64,
    default_db: RwLock<Option<String>>,
    session: Mutex<Option<Arc<Session>>>,
    handshaking: AtomicBool,
    reconnect_lock: tokio::sync::Mutex<()>,
}

impl Connection {
    /// Connects over TCP.
    pub async fn connect(options: ConnectionOptions) -> Result<Connection> {
        Self::connect_with(options, Arc::new(TcpConnector)).await
    }

    /// Connects through a custom transport.
    pub async fn connect_with(options: ConnectionOptions, connector: Arc<dyn Connector>) -> Result<Connection> {
        let connection = Connection {
            default_db: RwLock::new(options.db.clone()),
            options,
            connector,
            cache: Arc::new(Pbkdf2Cache::new()),
            next_token: AtomicU64::new(0),
            session: Mutex::new(None),
            handshaking: AtomicBool::new(false),
            reconnect_lock: tokio::sync::Mutex::new(()),
        };
        connection.reconnect(false, None).await?;
        Ok(connection)
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.handshaking.load(Ordering::Acquire) {
            return ConnectionStatus::Handshaking;
        }
        match self.session.lock().as_ref() {
            Some(session) => session.status(),
            None => ConnectionStatus::Disconnected,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Sets the database used by queries that don't name one.
    pub fn use_db(&self, db: impl Into<String>) {
        *self.default_db.write() = Some(db.into());
    }

    pub fn default_db(&self) -> Option<String> {
        self.default_db.read().clone()
    }

    /// Closes the current socket (if any) and opens a new one. Tokens keep
    /// counting from where they were.
    pub async fn reconnect(&self, noreply_wait: bool, timeout: Option<Duration>) -> Result<()> {
        let _guard = self.reconnect_lock.lock().await;
        self.close(noreply_wait).await?;

        let timeout = timeout.unwrap_or_else(|| self.options.connect_timeout());
        self.handshaking.store(true, Ordering::Release);
        let opened = tokio::time::timeout(timeout, self.open_session()).await;
        self.handshaking.store(false, Ordering::Release);

        let session = opened.map_err(|_| {
            ReqlError::Timeout(format!(
                "Could not connect to {}, operation timed out.",
                self.options.address()
            ))
        })??;
        *self.session.lock() = Some(session);
        Ok(())
    }

    async fn open_session(&self) -> Result<Arc<Session>> {
        let mut stream = self.connector.connect(&self.options).await?;
        let mut handshake = self.options.handshake(self.cache.clone());
        perform_handshake(&mut stream, handshake.as_mut()).await?;
        tracing::info!(
            address = %self.options.address(),
            handshake = ?self.options.handshake,
            "Connected"
        );
        Ok(Session::start(stream))
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn current_session(&self) -> Result<Arc<Session>> {
        self.session
            .lock()
            .clone()
            .ok_or_else(ReqlError::connection_closed)
    }

    /// Sends a query without waiting for its reply.
    pub fn submit(&self, term: Term, options: &RunOptions) -> Result<PendingResponse> {
        let session = self.current_session()?;
        let token = self.next_token();
        let term = Arc::new(term);
        let default_db = self.default_db();
        let query = Query::start(token, term.clone(), options.global_optargs(default_db.as_deref()));

        if options.noreply {
            session.enqueue(&query, None, false)?;
            return Ok(PendingResponse {
                token,
                format: options.format,
                state: PendingState::NoReply,
            });
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingQuery {
            term: Some(term),
            format: options.format,
            tx,
        };
        session.enqueue(&query, Some(pending), false)?;
        Ok(PendingResponse {
            token,
            format: options.format,
            state: PendingState::Waiting(rx),
        })
    }

    /// Runs a query and waits for its result.
    pub async fn run(&self, term: Term, options: &RunOptions) -> Result<QueryOutput> {
        self.submit(term, options)?.wait(None).await
    }

    fn submit_control(&self, session: &Session, query_type: QueryType, allow_closing: bool) -> Result<PendingResponse> {
        let token = self.next_token();
        let (tx, rx) = oneshot::channel();
        let pending = PendingQuery {
            term: None,
            format: FormatOptions::default(),
            tx,
        };
        session.enqueue(&Query::control(token, query_type), Some(pending), allow_closing)?;
        Ok(PendingResponse {
            token,
            format: FormatOptions::default(),
            state: PendingState::Waiting(rx),
        })
    }

    /// Waits until every `noreply` query sent so far has been processed.
    pub async fn noreply_wait(&self) -> Result<()> {
        let session = self.current_session()?;
        match self.submit_control(&session, QueryType::NoreplyWait, false)?.wait(None).await? {
            QueryOutput::WaitComplete => Ok(()),
            other => Err(ReqlError::driver(format!(
                "Unexpected reply to NOREPLY_WAIT: {}",
                other.kind()
            ))),
        }
    }

    pub async fn server_info(&self) -> Result<Datum> {
        let session = self.current_session()?;
        match self.submit_control(&session, QueryType::ServerInfo, false)?.wait(None).await? {
            QueryOutput::ServerInfo(info) => Ok(info),
            other => Err(ReqlError::driver(format!(
                "Unexpected reply to SERVER_INFO: {}",
                other.kind()
            ))),
        }
    }

    /// Closes the connection. Cursors fail right away with
    /// "Connection is closed."; with `noreply_wait`, outstanding `noreply`
    /// writes are drained first (bounded by `close_timeout_secs`). Closing an
    /// already closed connection does nothing.
    pub async fn close(&self, noreply_wait: bool) -> Result<()> {
        let session = match self.session.lock().clone() {
            Some(session) => session,
            None => return Ok(()),
        };
        if !session.begin_closing() {
            return Ok(());
        }

        let mut result = Ok(());
        if noreply_wait {
            result = match self.submit_control(&session, QueryType::NoreplyWait, true) {
                Ok(mut pending) => pending.wait(self.options.close_timeout()).await.map(|_| ()),
                Err(e) => Err(e),
            };
        }

        session.shutdown(ReqlError::connection_closed());
        tracing::info!(address = %self.options.address(), "Connection closed");
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.begin_closing();
            session.shutdown(ReqlError::connection_closed());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.options.address())
            .field("status", &self.status())
            .finish()
    }
}
