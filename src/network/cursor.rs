//! Streaming query results.
//!
//! A cursor buffers the batches the server sends for one token and asks for
//! the next batch with CONTINUE once the buffer drains below the size of the
//! last batch. At most one CONTINUE is outstanding at any time.
//!
//! The demultiplexer feeds a cursor through [`CursorShared::extend`]; the
//! consumer pulls from it through [`Cursor::next`]. Both sides share one
//! lock, and the consumer is woken through a `Notify`.

use super::connection::Session;
use super::protocol::Response;
use crate::error::{ReqlError, Result};
use crate::reql::codec::{self, FormatOptions};
use crate::reql::{Datum, QueryType, ResponseType, Term};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why a cursor stopped producing new items.
#[derive(Debug, Clone)]
enum CursorEnd {
    /// The server sent the final batch.
    Exhausted,
    /// Closed by the consumer.
    Closed,
    Error(ReqlError),
}

#[derive(Debug)]
struct CursorState {
    items: VecDeque<Value>,
    outstanding: usize,
    threshold: usize,
    end: Option<CursorEnd>,
}

/// Cursor state shared between the consumer handle and the connection.
#[derive(Debug)]
pub(crate) struct CursorShared {
    token: u64,
    term: Option<Arc<Term>>,
    format: FormatOptions,
    is_feed: bool,
    profile: Option<Value>,
    session: Weak<Session>,
    state: Mutex<CursorState>,
    notify: Notify,
}

impl CursorShared {
    /// A cursor whose START is still outstanding; its first response is
    /// delivered through `extend` like any other batch.
    pub(crate) fn new(
        token: u64,
        term: Option<Arc<Term>>,
        format: FormatOptions,
        first: &Response,
        session: Weak<Session>,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            term,
            format,
            is_feed: first.is_feed(),
            profile: first.profile.clone(),
            session,
            state: Mutex::new(CursorState {
                items: VecDeque::new(),
                outstanding: 1,
                threshold: 1,
                end: None,
            }),
            notify: Notify::new(),
        })
    }

    /// Applies one response for this token.
    pub(crate) fn extend(&self, response: Response) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);

        if state.end.is_none() {
            match response.response_type {
                ResponseType::SuccessPartial => {
                    // A batch is never smaller than one item for fetch pacing,
                    // so an empty batch still triggers the next CONTINUE.
                    state.threshold = response.data.len().max(1);
                    state.items.extend(response.data);
                }
                ResponseType::SuccessSequence => {
                    state.items.extend(response.data);
                    state.end = Some(CursorEnd::Exhausted);
                }
                kind if kind.is_error() => {
                    state.end = Some(CursorEnd::Error(response.make_error(self.term.clone())));
                }
                kind => {
                    state.end = Some(CursorEnd::Error(ReqlError::driver(format!(
                        "Unexpected response type {} for a cursor.",
                        kind.as_u64()
                    ))));
                }
            }
        }

        tracing::trace!(
            token = self.token,
            buffered = state.items.len(),
            outstanding = state.outstanding,
            "Cursor extended"
        );

        self.maybe_fetch(&mut state);
        self.release_if_finished(&state);
        drop(state);
        self.notify.notify_one();
    }

    /// Issues a CONTINUE when the buffer runs low and nothing is in flight.
    fn maybe_fetch(&self, state: &mut CursorState) {
        if state.end.is_some() || state.outstanding > 0 || state.items.len() >= state.threshold {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            if session.send_control(self.token, QueryType::Continue).is_ok() {
                state.outstanding += 1;
            }
        }
    }

    fn release_if_finished(&self, state: &CursorState) {
        if state.outstanding == 0 && state.end.is_some() {
            if let Some(session) = self.session.upgrade() {
                session.forget_cursor(self.token);
            }
        }
    }

    /// Ends the cursor early, sending STOP if the server may still be
    /// streaming. Returns without waiting for the acknowledgement.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.end.is_some() {
            return;
        }
        state.end = Some(CursorEnd::Closed);
        state.items.clear();

        if let Some(session) = self.session.upgrade() {
            if session.is_open() && session.send_control(self.token, QueryType::Stop).is_ok() {
                state.outstanding += 1;
                tracing::debug!(token = self.token, "Cursor closed, STOP sent");
            }
        }
        self.release_if_finished(&state);
        drop(state);
        self.notify.notify_one();
    }

    /// Fails the cursor because the connection went away. Buffered items are
    /// discarded.
    pub(crate) fn abort(&self, error: ReqlError) {
        let mut state = self.state.lock();
        state.outstanding = 0;
        if !matches!(state.end, Some(CursorEnd::Closed)) {
            state.items.clear();
            state.end = Some(CursorEnd::Error(error));
        }
        drop(state);
        self.notify.notify_one();
    }
}

/// Consumer handle over a streaming result.
///
/// Dropping the handle closes the cursor.
#[derive(Debug)]
pub struct Cursor {
    shared: Arc<CursorShared>,
}

impl Cursor {
    pub(crate) fn new(shared: Arc<CursorShared>) -> Self {
        Self { shared }
    }

    pub fn token(&self) -> u64 {
        self.shared.token
    }

    /// True if the query is a changefeed, which never ends on its own.
    pub fn is_feed(&self) -> bool {
        self.shared.is_feed
    }

    /// Profile attached to the first batch, when run with `profile`.
    pub fn profile(&self) -> Result<Option<Datum>> {
        self.shared
            .profile
            .clone()
            .map(|p| codec::decode(p, &self.shared.format))
            .transpose()
    }

    /// Items received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Next item, `None` once the sequence ended or the cursor was closed.
    ///
    /// With a timeout, an expired wait returns a timeout error and leaves the
    /// cursor untouched; calling `next` again resumes waiting.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Result<Option<Datum>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            {
                let mut state = self.shared.state.lock();
                if let Some(item) = state.items.pop_front() {
                    self.shared.maybe_fetch(&mut state);
                    drop(state);
                    return codec::decode(item, &self.shared.format).map(Some);
                }
                match &state.end {
                    Some(CursorEnd::Exhausted) | Some(CursorEnd::Closed) => return Ok(None),
                    Some(CursorEnd::Error(error)) => return Err(error.clone()),
                    None => self.shared.maybe_fetch(&mut state),
                }
            }

            let notified = self.shared.notify.notified();
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(ReqlError::timeout());
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Drains the cursor.
    pub async fn collect(mut self) -> Result<Vec<Datum>> {
        let mut items = Vec::new();
        while let Some(item) = self.next(None).await? {
            items.push(item);
        }
        Ok(items)
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.shared.close();
    }
}
