//! Protocol version 2 session.
//!
//! Every request is a single simple query with the parameters inlined as
//! SQL literals. Messages carry no length, so each one is read field by
//! field in the layout its tag implies.

use crate::encoding::Encoding;
use crate::error::{Error, ErrorChain, Result};
use crate::handler::ResultHandler;
use crate::params::{
    ParamValue, ParameterList, SimpleParameterList, binary_literal, escape_bytea, quote_literal,
};
use crate::protocol::backend::unknown_tag;
use crate::protocol::legacy::{
    LegacyTag, bitmap_has_value, error_fields, notice_fields, null_bitmap_len,
    write_function_call_header, write_terminate,
};
use crate::protocol::types::{FormatCode, TransactionStatus, oid};
use crate::query::Query;
use crate::row::{Field, Row};
use crate::transport::Transport;

use super::dispatch::{Dispatch, RowBuffer};
use super::{Notification, QueryFlags, SessionProtocol, SessionState};

pub struct LegacySession {
    transport: Transport,
    state: SessionState,
}

fn bind_failure(cause: &std::io::Error) -> Error {
    tracing::debug!("parameter stream failed: {cause}");
    Error::InvalidParameterValue("Unable to bind parameter values for statement.".into())
}

/// Binary values are inlined as bytea escapes or as literals of a
/// fixed-width type. Anything else has no text form here.
fn check_inlinable(params: &ParameterList) -> Result<()> {
    for sub in params.subparams() {
        for index in 1..=sub.param_count() {
            let Some(ParamValue::Binary(data)) = sub.value(index)? else {
                continue;
            };
            let type_oid = sub.type_oid(index)?;
            if type_oid != oid::BYTEA
                && type_oid != oid::UNSPECIFIED
                && binary_literal(data, type_oid).is_none()
            {
                return Err(Error::InvalidParameterValue(format!(
                    "Binary values of type {type_oid} cannot be sent to a protocol version 2 server."
                )));
            }
        }
    }
    Ok(())
}

impl LegacySession {
    pub(crate) fn new(transport: Transport, state: SessionState) -> Self {
        Self { transport, state }
    }

    pub(crate) fn set_encoding(&mut self, encoding: Encoding) {
        self.transport.set_encoding(encoding);
    }

    /// Inline one parameter. A failed stream is returned, not raised.
    fn send_parameter(
        &mut self,
        params: &mut SimpleParameterList,
        index: usize,
    ) -> Result<Option<std::io::Error>> {
        let scs = self.state.standard_conforming_strings;
        let type_oid = params.type_oid(index)?;
        let transport = &mut self.transport;
        match params.value_mut(index)? {
            Some(ParamValue::Literal(text)) => transport.send_str(text),
            Some(ParamValue::Text(text)) => transport.send_str(&quote_literal(text, scs)),
            Some(ParamValue::Null) | None => transport.send_str("NULL"),
            Some(ParamValue::Binary(data)) => match binary_literal(data, type_oid) {
                Some(literal) => transport.send_str(&literal),
                None => {
                    let mut escaped = Vec::with_capacity(data.len() * 5 + 2);
                    escaped.push(b'\'');
                    escape_bytea(data, scs, &mut escaped);
                    escaped.push(b'\'');
                    transport.send_bytes(&escaped);
                }
            },
            Some(ParamValue::Stream(stream)) => {
                let len = stream.len();
                transport.send_u8(b'\'');
                let failure = transport.send_stream_mapped(stream.reader(), len, |chunk, out| {
                    escape_bytea(chunk, scs, out);
                })?;
                transport.send_u8(b'\'');
                return Ok(failure);
            }
        }
        Ok(None)
    }

    fn send_query(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        implicit_begin: bool,
    ) -> Result<Option<std::io::Error>> {
        tracing::debug!(" FE=> SimpleQuery({query})");
        let mut failure = None;
        self.transport.send_u8(b'Q');
        if implicit_begin {
            self.transport.send_str("BEGIN;");
        }
        for (i, (statement, sub)) in query
            .statements()
            .iter()
            .zip(params.subparams_mut())
            .enumerate()
        {
            if i > 0 {
                self.transport.send_str(";");
            }
            for (j, fragment) in statement.fragments().iter().enumerate() {
                if j > 0 {
                    if let Some(e) = self.send_parameter(sub, j)? {
                        failure.get_or_insert(e);
                    }
                }
                self.transport.send_str(fragment);
            }
        }
        self.transport.send_u8(0);
        self.transport.flush()?;
        Ok(failure)
    }

    fn recv_fields(&mut self) -> Result<Vec<Field>> {
        let count = self.transport.recv_i16()?;
        let mut fields = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let label = self.transport.recv_cstr()?;
            let type_oid = self.transport.recv_i32()? as u32;
            let type_len = self.transport.recv_i16()?;
            let type_modifier = self.transport.recv_i32()?;
            fields.push(Field {
                label,
                type_oid,
                type_len,
                type_modifier,
                ..Field::default()
            });
        }
        tracing::debug!(" <=BE RowDescription({})", fields.len());
        Ok(fields)
    }

    /// Read an AsciiRow or BinaryRow. `None` if a cell could not be allocated.
    fn recv_row(&mut self, field_count: usize, binary: bool) -> Result<Option<Row>> {
        let bitmap = self.transport.recv_bytes(null_bitmap_len(field_count))?;
        let mut cells = Vec::with_capacity(field_count);
        let mut complete = true;
        for i in 0..field_count {
            if !bitmap_has_value(&bitmap, i) {
                cells.push(None);
                continue;
            }
            let mut len = self.transport.recv_i32()?;
            if !binary {
                // Text lengths count the length word itself.
                len -= 4;
            }
            let len = usize::try_from(len).unwrap_or(0);
            match self.transport.try_recv_bytes(len)? {
                Some(cell) => cells.push(Some(cell)),
                None => complete = false,
            }
        }
        Ok(complete.then(|| Row::new(cells)))
    }

    fn process_results(
        &mut self,
        dispatch: &mut Dispatch<'_>,
        buffer: &mut RowBuffer,
        flags: QueryFlags,
    ) -> Result<()> {
        loop {
            let tag = self.transport.recv_u8()?;
            match LegacyTag::from_byte(tag)? {
                kind @ (LegacyTag::AsciiRow | LegacyTag::BinaryRow) => {
                    let binary = kind == LegacyTag::BinaryRow;
                    let Some(fields) = buffer.fields_mut() else {
                        return Err(Error::ProtocolViolation(
                            "Received row data before any RowDescription.".into(),
                        ));
                    };
                    if binary {
                        for field in fields.iter_mut() {
                            field.format = FormatCode::Binary;
                        }
                    }
                    let field_count = fields.len();
                    match self.recv_row(field_count, binary)? {
                        Some(row) => {
                            tracing::trace!(" <=BE DataRow");
                            buffer.push(row);
                        }
                        None => buffer.out_of_memory(dispatch),
                    }
                }
                LegacyTag::CompletedResponse => {
                    let status = self.transport.recv_cstr()?;
                    tracing::debug!(" <=BE CommandStatus({status})");
                    match status.as_str() {
                        "BEGIN" => self.state.transaction_status = TransactionStatus::InTransaction,
                        "COMMIT" | "ROLLBACK" => {
                            self.state.transaction_status = TransactionStatus::Idle;
                        }
                        _ => {}
                    }
                    dispatch.complete(buffer, &status, flags.both_rows_and_status);
                }
                LegacyTag::EmptyQueryResponse => {
                    self.transport.recv_cstring()?;
                    tracing::debug!(" <=BE EmptyQuery");
                }
                LegacyTag::ErrorResponse => {
                    let text = self.transport.recv_cstr()?;
                    tracing::debug!(" <=BE ErrorResponse({text})");
                    dispatch.error(Error::Server(error_fields(&text)));
                }
                LegacyTag::NoticeResponse => {
                    let text = self.transport.recv_cstr()?;
                    tracing::debug!(" <=BE NoticeResponse({text})");
                    dispatch.warning(notice_fields(&text));
                }
                LegacyTag::CursorResponse => {
                    self.transport.recv_cstring()?;
                }
                LegacyTag::RowDescription => {
                    let fields = self.recv_fields()?;
                    buffer.start(fields);
                }
                LegacyTag::NotificationResponse => self.recv_notification()?,
                LegacyTag::ReadyForQuery => {
                    tracing::debug!(" <=BE ReadyForQuery");
                    return Ok(());
                }
                LegacyTag::Authentication
                | LegacyTag::BackendKeyData
                | LegacyTag::CopyInResponse
                | LegacyTag::CopyOutResponse
                | LegacyTag::FunctionResultResponse => return Err(unknown_tag(tag)),
            }
        }
    }

    fn recv_notification(&mut self) -> Result<()> {
        let pid = self.transport.recv_i32()?;
        let channel = self.transport.recv_cstr()?;
        tracing::debug!(" <=BE AsyncNotify({pid},{channel})");
        self.state.notifications.push(Notification {
            pid,
            channel,
            payload: String::new(),
        });
        Ok(())
    }

    /// Send BEGIN as its own request and check its acknowledgement.
    ///
    /// Notices count as failures here since nothing else should be said.
    fn begin_transaction(&mut self) -> Result<()> {
        tracing::debug!(" FE=> SimpleQuery(BEGIN)");
        self.transport.send_u8(b'Q');
        self.transport.send_cstr("BEGIN");
        self.transport.flush()?;

        let mut errors = ErrorChain::new();
        let mut acknowledged = false;
        loop {
            let tag = self.transport.recv_u8()?;
            match LegacyTag::from_byte(tag)? {
                LegacyTag::CompletedResponse => {
                    let status = self.transport.recv_cstr()?;
                    if acknowledged {
                        errors.push(Error::UnexpectedResponse(format!(
                            "Unexpected command status: {status}."
                        )));
                    } else if status == "BEGIN" {
                        acknowledged = true;
                        self.state.transaction_status = TransactionStatus::InTransaction;
                    } else {
                        acknowledged = true;
                        errors.push(Error::UnexpectedResponse(format!(
                            "Expected command status BEGIN, got {status}."
                        )));
                    }
                }
                LegacyTag::ErrorResponse => {
                    let text = self.transport.recv_cstr()?;
                    errors.push(Error::Server(error_fields(&text)));
                }
                LegacyTag::NoticeResponse => {
                    let text = self.transport.recv_cstr()?;
                    errors.push(Error::Server(notice_fields(&text)));
                }
                LegacyTag::NotificationResponse => self.recv_notification()?,
                LegacyTag::ReadyForQuery => return errors.into_result(),
                _ => return Err(unknown_tag(tag)),
            }
        }
    }

    fn send_function_call(
        &mut self,
        fnid: i32,
        params: &mut SimpleParameterList,
    ) -> Result<Option<std::io::Error>> {
        let count = params.param_count();
        for i in 1..=count {
            if matches!(params.value(i)?, Some(ParamValue::Null)) {
                return Err(Error::InvalidParameterValue(format!(
                    "Null values are not supported in fast-path calls (parameter {i})."
                )));
            }
        }
        let param_count = i32::try_from(count).map_err(|_| {
            Error::InvalidParameterValue(format!("Too many fast-path parameters: {count}"))
        })?;

        tracing::debug!(" FE=> FunctionCall({fnid}, {count} params)");
        write_function_call_header(self.transport.out(), fnid, param_count);
        let encoding = self.transport.encoding();
        let mut failure = None;
        for i in 1..=count {
            let len = params.wire_len(i, encoding)?.unwrap_or(0);
            self.transport.send_i32(crate::protocol::codec::wire_len(len)?);
            match params.value_mut(i)? {
                Some(ParamValue::Stream(stream)) => {
                    if let Some(e) = self.transport.send_stream(stream.reader(), len)? {
                        failure.get_or_insert(e);
                    }
                }
                Some(ParamValue::Binary(data)) => self.transport.send_bytes(data),
                _ => self
                    .transport
                    .send_bytes(params.encoded(i).unwrap_or_default()),
            }
        }
        self.transport.flush()?;
        Ok(failure)
    }

    fn recv_function_result(&mut self) -> Result<Option<Vec<u8>>> {
        let mut errors = ErrorChain::new();
        let mut value = None;
        loop {
            let tag = self.transport.recv_u8()?;
            match LegacyTag::from_byte(tag)? {
                LegacyTag::FunctionResultResponse => match self.transport.recv_u8()? {
                    b'G' => {
                        let len = self.transport.recv_i32()?;
                        let len = usize::try_from(len).unwrap_or(0);
                        value = Some(self.transport.recv_bytes(len)?);
                        // The result is followed by the '0' terminator.
                        let terminator = self.transport.recv_u8()?;
                        if terminator != b'0' {
                            return Err(unknown_tag(terminator));
                        }
                    }
                    b'0' => {}
                    other => return Err(unknown_tag(other)),
                },
                LegacyTag::ErrorResponse => {
                    let text = self.transport.recv_cstr()?;
                    tracing::debug!(" <=BE ErrorResponse({text})");
                    errors.push(Error::Server(error_fields(&text)));
                }
                LegacyTag::NoticeResponse => {
                    let text = self.transport.recv_cstr()?;
                    self.state.warnings.push(notice_fields(&text));
                }
                LegacyTag::NotificationResponse => self.recv_notification()?,
                LegacyTag::ReadyForQuery => {
                    errors.into_result()?;
                    return Ok(value);
                }
                _ => return Err(unknown_tag(tag)),
            }
        }
    }

    fn drain_async(&mut self) -> Result<()> {
        while self.transport.has_pending()? {
            match self.transport.recv_u8()? {
                b'A' => self.recv_notification()?,
                b'E' => {
                    let text = self.transport.recv_cstr()?;
                    return Err(Error::Server(error_fields(&text)));
                }
                b'N' => {
                    let text = self.transport.recv_cstr()?;
                    self.state.warnings.push(notice_fields(&text));
                }
                other => return Err(unknown_tag(other)),
            }
        }
        Ok(())
    }

    /// Close the socket after an I/O or protocol failure.
    fn fail<T>(&mut self, error: Error) -> Result<T> {
        if error.is_fatal() {
            self.transport.close();
        }
        Err(error)
    }
}

impl SessionProtocol for LegacySession {
    fn state(&self) -> &SessionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    fn encoding(&self) -> Encoding {
        self.transport.encoding()
    }

    fn protocol_version(&self) -> u8 {
        2
    }

    fn execute(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        handler: &mut dyn ResultHandler,
        max_rows: u32,
        flags: QueryFlags,
    ) -> Result<()> {
        if flags.describe_only {
            return Err(Error::NotImplemented(
                "Describe-only queries are not supported by protocol version 2".into(),
            ));
        }
        if params.has_out_parameters() {
            return Err(Error::NotImplemented(
                "Output parameters are not supported by protocol version 2".into(),
            ));
        }
        params.check_all_set()?;
        check_inlinable(params)?;

        let implicit_begin =
            !flags.suppress_begin && self.state.transaction_status == TransactionStatus::Idle;
        let mut dispatch = Dispatch::new(handler, implicit_begin);
        let failure = match self.send_query(query, params, implicit_begin) {
            Ok(failure) => failure,
            Err(e) => {
                self.transport.close();
                dispatch.error(e);
                return dispatch.finish();
            }
        };

        let mut buffer = RowBuffer::new(max_rows, flags.no_results);
        if let Err(e) = self.process_results(&mut dispatch, &mut buffer, flags) {
            self.transport.close();
            dispatch.error(e);
        }
        if let Some(cause) = failure {
            dispatch.error(bind_failure(&cause));
        }
        dispatch.finish()
    }

    fn fastpath_call(
        &mut self,
        fnid: i32,
        params: &mut SimpleParameterList,
        suppress_begin: bool,
    ) -> Result<Option<Vec<u8>>> {
        params.check_all_set()?;
        if !suppress_begin && self.state.transaction_status == TransactionStatus::Idle {
            if let Err(e) = self.begin_transaction() {
                return self.fail(e);
            }
        }
        let failure = match self.send_function_call(fnid, params) {
            Ok(failure) => failure,
            Err(e) => return self.fail(e),
        };
        let result = match self.recv_function_result() {
            Ok(value) => value,
            Err(e) => return self.fail(e),
        };
        if let Some(cause) = failure {
            return Err(bind_failure(&cause));
        }
        Ok(result)
    }

    fn process_notifies(&mut self) -> Result<()> {
        if self.state.transaction_status != TransactionStatus::Idle {
            return Ok(());
        }
        match self.drain_async() {
            Err(e) => self.fail(e),
            Ok(()) => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn close(&mut self) {
        if self.transport.is_closed() {
            return;
        }
        tracing::debug!(" FE=> Terminate");
        write_terminate(self.transport.out());
        if let Err(e) = self.transport.flush() {
            tracing::debug!("failed to send Terminate: {e}");
        }
        self.transport.close();
    }
}

impl Drop for LegacySession {
    fn drop(&mut self) {
        self.close();
    }
}
