//! COPY sub-protocol handles.
//!
//! A handle borrows its session for as long as the copy runs, and the
//! session additionally records the copy's id so a handle that outlived its
//! operation (after a fatal error, say) can tell it is no longer active.

use std::ops::Deref;

use crate::error::{Error, ErrorChain, Result};
use crate::protocol::backend::query::copy_row_count;
use crate::protocol::backend::{
    BackendTag, CommandComplete, CopyResponse, ErrorResponse, parse_fields, unknown_tag,
};
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_copy_fail};
use crate::protocol::types::FormatCode;

use super::SessionProtocol;
use super::modern::ModernSession;

/// Buffered copy data is written to the socket past this size.
const COPY_FLUSH_THRESHOLD: usize = 8192;

const CANCEL_REASON: &str = "Copy cancel requested";

enum Event {
    Data(Vec<u8>),
    Ready,
}

/// State shared by both copy directions. Every handle dereferences to it.
pub struct CopyState<'s> {
    session: &'s mut ModernSession,
    id: u64,
    response: CopyResponse,
    handled: Option<u64>,
    /// Errors reported since the last ReadyForQuery
    errors: ErrorChain,
}

impl<'s> CopyState<'s> {
    pub fn format(&self) -> FormatCode {
        self.response.format
    }

    pub fn field_count(&self) -> usize {
        self.response.field_formats.len()
    }

    /// Format of column `index`, counted from 0.
    pub fn field_format(&self, index: usize) -> Option<FormatCode> {
        self.response.field_formats.get(index).copied()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_copy_active(self.id)
    }

    /// Row count from the server's `COPY n` tag, once received.
    pub fn handled_row_count(&self) -> Option<u64> {
        self.handled
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidUsage("This copy stream is closed.".into()))
        }
    }

    /// Close the session on fatal errors; the copy ends with it.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.session.abort();
            }
        }
        result
    }

    fn next_event(&mut self) -> Result<Event> {
        loop {
            let transport = self.session.transport_mut();
            let tag = transport.recv_message()?;
            let payload = transport.payload();
            match BackendTag::from_byte(tag)? {
                BackendTag::CopyData => {
                    return Ok(Event::Data(payload.to_vec()));
                }
                BackendTag::CopyDone => tracing::debug!(" <=BE CopyDone"),
                BackendTag::CommandComplete => {
                    let status = CommandComplete::parse(payload)?;
                    tracing::debug!(" <=BE CommandStatus({status})");
                    self.handled = copy_row_count(status);
                }
                BackendTag::ErrorResponse => {
                    let error = ErrorResponse::parse(payload)?;
                    tracing::debug!(" <=BE ErrorMessage({})", error.fields);
                    self.errors.push(error.into_error());
                }
                BackendTag::NoticeResponse => {
                    let warning = parse_fields(payload)?;
                    self.session.state_mut().warnings.push(warning);
                }
                BackendTag::ParameterStatus => self.session.recv_parameter_status()?,
                BackendTag::NotificationResponse => self.session.recv_notification()?,
                BackendTag::ReadyForQuery => {
                    self.session.recv_ready()?;
                    self.session.unlock_copy(self.id);
                    return Ok(Event::Ready);
                }
                _ => return Err(unknown_tag(tag)),
            }
        }
    }

    /// Read up to ReadyForQuery, discarding any data.
    fn drain(&mut self) -> Result<()> {
        while let Event::Data(data) = self.next_event()? {
            tracing::trace!("discarding {} bytes of copy data", data.len());
        }
        Ok(())
    }

    fn take_errors(&mut self) -> ErrorChain {
        std::mem::take(&mut self.errors)
    }
}

/// Data flowing from the client to the server.
pub struct CopyIn<'s> {
    state: CopyState<'s>,
}

/// Data flowing from the server to the client.
pub struct CopyOut<'s> {
    state: CopyState<'s>,
}

/// A running COPY, in whichever direction the server chose.
pub enum CopyOperation<'s> {
    In(CopyIn<'s>),
    Out(CopyOut<'s>),
}

impl<'s> CopyOperation<'s> {
    pub(crate) fn new(
        session: &'s mut ModernSession,
        id: u64,
        kind: BackendTag,
        response: CopyResponse,
    ) -> Self {
        let state = CopyState {
            session,
            id,
            response,
            handled: None,
            errors: ErrorChain::new(),
        };
        if kind == BackendTag::CopyInResponse {
            CopyOperation::In(CopyIn { state })
        } else {
            CopyOperation::Out(CopyOut { state })
        }
    }

    pub fn cancel_copy(&mut self) -> Result<()> {
        match self {
            CopyOperation::In(copy) => copy.cancel_copy(),
            CopyOperation::Out(copy) => copy.cancel_copy(),
        }
    }

    pub fn into_copy_in(self) -> Option<CopyIn<'s>> {
        match self {
            CopyOperation::In(copy) => Some(copy),
            CopyOperation::Out(_) => None,
        }
    }

    pub fn into_copy_out(self) -> Option<CopyOut<'s>> {
        match self {
            CopyOperation::Out(copy) => Some(copy),
            CopyOperation::In(_) => None,
        }
    }
}

impl<'s> Deref for CopyOperation<'s> {
    type Target = CopyState<'s>;

    fn deref(&self) -> &Self::Target {
        match self {
            CopyOperation::In(copy) => &copy.state,
            CopyOperation::Out(copy) => &copy.state,
        }
    }
}

impl<'s> Deref for CopyIn<'s> {
    type Target = CopyState<'s>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'s> Deref for CopyOut<'s> {
    type Target = CopyState<'s>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl CopyIn<'_> {
    /// Frame `data` as one CopyData message. Output goes to the socket once
    /// enough has been buffered.
    pub fn write_to_copy(&mut self, data: &[u8]) -> Result<()> {
        self.state.ensure_active()?;
        let transport = self.state.session.transport_mut();
        write_copy_data(transport.out(), data);
        let result = if transport.out().len() >= COPY_FLUSH_THRESHOLD {
            transport.flush()
        } else {
            Ok(())
        };
        self.state.guard(result)
    }

    pub fn flush_copy(&mut self) -> Result<()> {
        self.state.ensure_active()?;
        let result = self.state.session.transport_mut().flush();
        self.state.guard(result)
    }

    /// Finish the copy and return the number of rows the server handled.
    pub fn end_copy(&mut self) -> Result<u64> {
        self.state.ensure_active()?;
        tracing::debug!(" FE=> CopyDone");
        let transport = self.state.session.transport_mut();
        write_copy_done(transport.out());
        let mut result = transport.flush();
        if result.is_ok() {
            result = self.state.drain();
        }
        self.state.guard(result)?;
        self.state.take_errors().into_result()?;
        Ok(self.state.handled.unwrap_or(0))
    }

    /// Abort the copy with CopyFail. The server must answer with exactly one error.
    pub fn cancel_copy(&mut self) -> Result<()> {
        self.state.ensure_active()?;
        tracing::debug!(" FE=> CopyFail");
        let transport = self.state.session.transport_mut();
        write_copy_fail(transport.out(), CANCEL_REASON);
        let mut result = transport.flush();
        if result.is_ok() {
            result = self.state.drain();
        }
        self.state.guard(result)?;
        match self.state.take_errors().len() {
            1 => Ok(()),
            0 => Err(Error::UnexpectedResponse(
                "Missing expected error response to copy cancel request".into(),
            )),
            n => Err(Error::UnexpectedResponse(format!(
                "Got {n} error responses to single copy cancel request"
            ))),
        }
    }
}

impl CopyOut<'_> {
    /// Next chunk of copy data, or `None` once the copy has completed.
    pub fn read_from_copy(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.state.is_active() {
            return Ok(None);
        }
        let event = self.state.next_event();
        match self.state.guard(event)? {
            Event::Data(data) => Ok(Some(data)),
            Event::Ready => {
                self.state.take_errors().into_result()?;
                Ok(None)
            }
        }
    }

    /// Cancel the running statement out of band and drain what is left.
    pub fn cancel_copy(&mut self) -> Result<()> {
        self.state.ensure_active()?;
        self.state.session.state().cancel_token().cancel();
        let result = self.state.drain();
        self.state.guard(result)?;
        // the cancellation error is expected
        drop(self.state.take_errors());
        Ok(())
    }
}

impl Drop for CopyIn<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.cancel_copy() {
                tracing::warn!("failed to cancel an unfinished copy: {e}");
            }
        }
    }
}

impl Drop for CopyOut<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.cancel_copy() {
                tracing::warn!("failed to cancel an unfinished copy: {e}");
            }
        }
    }
}
