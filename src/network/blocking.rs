//! Blocking API over the async connection.
//!
//! A `BlockingConnection` owns a small tokio runtime and drives the same
//! connection core from synchronous code. Do not use it from inside an async
//! context: blocking on a runtime from within another one panics.

use super::connection::{Connection, ConnectionStatus, QueryOutput, RunOptions};
use super::cursor::Cursor;
use super::transport::{ConnectionOptions, Connector, TcpConnector};
use crate::error::{ReqlError, Result};
use crate::reql::{Datum, Term};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

fn build_runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("reql-io")
        .enable_all()
        .build()
        .map_err(|e| ReqlError::driver(format!("Failed to start I/O runtime: {}", e)))
}

pub struct BlockingConnection {
    inner: Connection,
    runtime: Arc<Runtime>,
}

impl BlockingConnection {
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        Self::connect_with(options, Arc::new(TcpConnector))
    }

    pub fn connect_with(options: ConnectionOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        let runtime = Arc::new(build_runtime()?);
        let inner = runtime.block_on(Connection::connect_with(options, connector))?;
        Ok(Self { inner, runtime })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn use_db(&self, db: impl Into<String>) {
        self.inner.use_db(db);
    }

    /// Runs a query; a cursor result is wrapped for blocking iteration.
    pub fn run(&self, term: Term, options: &RunOptions) -> Result<BlockingOutput> {
        let output = self.runtime.block_on(self.inner.run(term, options))?;
        Ok(match output {
            QueryOutput::Cursor(cursor) => BlockingOutput::Cursor(BlockingCursor {
                cursor,
                runtime: self.runtime.clone(),
                failed: false,
            }),
            QueryOutput::Atom(datum) => BlockingOutput::Atom(datum),
            QueryOutput::ServerInfo(datum) => BlockingOutput::ServerInfo(datum),
            QueryOutput::WaitComplete => BlockingOutput::WaitComplete,
            QueryOutput::NoReply => BlockingOutput::NoReply,
        })
    }

    pub fn server_info(&self) -> Result<Datum> {
        self.runtime.block_on(self.inner.server_info())
    }

    pub fn noreply_wait(&self) -> Result<()> {
        self.runtime.block_on(self.inner.noreply_wait())
    }

    pub fn reconnect(&self, noreply_wait: bool, timeout: Option<Duration>) -> Result<()> {
        self.runtime.block_on(self.inner.reconnect(noreply_wait, timeout))
    }

    pub fn close(&self, noreply_wait: bool) -> Result<()> {
        self.runtime.block_on(self.inner.close(noreply_wait))
    }
}

/// Blocking counterpart of [`QueryOutput`].
#[derive(Debug)]
pub enum BlockingOutput {
    Atom(Datum),
    Cursor(BlockingCursor),
    ServerInfo(Datum),
    WaitComplete,
    NoReply,
}

impl BlockingOutput {
    pub fn into_atom(self) -> Result<Datum> {
        match self {
            BlockingOutput::Atom(datum) | BlockingOutput::ServerInfo(datum) => Ok(datum),
            _ => Err(ReqlError::driver("Expected a single value")),
        }
    }

    pub fn into_cursor(self) -> Result<BlockingCursor> {
        match self {
            BlockingOutput::Cursor(cursor) => Ok(cursor),
            _ => Err(ReqlError::driver("Expected a cursor")),
        }
    }
}

/// Iterates a cursor by blocking on the connection's runtime. Iteration
/// stops after the first error.
#[derive(Debug)]
pub struct BlockingCursor {
    cursor: Cursor,
    runtime: Arc<Runtime>,
    failed: bool,
}

impl BlockingCursor {
    pub fn next_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<Datum>> {
        let cursor = &mut self.cursor;
        self.runtime.block_on(cursor.next(timeout))
    }

    pub fn is_feed(&self) -> bool {
        self.cursor.is_feed()
    }

    pub fn close(&self) {
        self.cursor.close();
    }
}

impl Iterator for BlockingCursor {
    type Item = Result<Datum>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_timeout(None) {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
