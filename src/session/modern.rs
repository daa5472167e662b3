//! Protocol version 3 session.
//!
//! Requests use the extended query protocol. Every statement of a request
//! is sent as Parse (unless cached) / Bind / Describe / Execute, and one Sync
//! closes the request; the server's answers are then read up to
//! ReadyForQuery.

use std::collections::{HashMap, VecDeque};

use crate::encoding::Encoding;
use crate::error::{Error, ErrorChain, Result};
use crate::handler::ResultHandler;
use crate::params::{ParamValue, ParameterList, SimpleParameterList};
use crate::protocol::backend::{
    BackendTag, CommandComplete, CopyResponse, DataRow, ErrorResponse, FunctionCallResponse,
    NotificationResponse, ParameterDescription, ParameterStatus, ReadyForQuery, RowDescription,
    parse_fields, unknown_tag,
};
use crate::protocol::codec::wire_len;
use crate::protocol::frontend::{
    msg_type, write_close_statement, write_copy_fail, write_describe_portal,
    write_describe_statement, write_execute, write_parse, write_query, write_sync,
    write_terminate,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::query::{Query, SimpleQuery};
use crate::transport::Transport;

use super::copy::CopyOperation;
use super::dispatch::{BeginState, Dispatch, RowBuffer};
use super::{Notification, QueryFlags, SessionProtocol, SessionState};

const COPY_VIA_EXECUTE: &str = "COPY commands are only supported using start_copy.";

/// A named statement known to the server.
#[derive(Debug, Clone)]
struct CachedStatement {
    name: String,
    oids: Vec<Oid>,
}

/// Wire lengths of a parameter block, `None` for NULL.
struct ValueBlock {
    lens: Vec<Option<usize>>,
    /// Bytes taken by the format codes and values
    size: usize,
}

pub struct ModernSession {
    transport: Transport,
    state: SessionState,
    /// Keyed by native SQL
    statements: HashMap<String, CachedStatement>,
    next_statement: u64,
    /// Parses awaiting ParseComplete, in send order. `None` is the unnamed statement.
    pending_parse: VecDeque<Option<String>>,
    copy_lock: Option<u64>,
    next_copy_id: u64,
}

fn bind_failure(cause: &std::io::Error) -> Error {
    tracing::debug!("parameter stream failed: {cause}");
    Error::InvalidParameterValue("Unable to bind parameter values for statement.".into())
}

impl ModernSession {
    pub(crate) fn new(transport: Transport, state: SessionState) -> Self {
        Self {
            transport,
            state,
            statements: HashMap::new(),
            next_statement: 1,
            pending_parse: VecDeque::new(),
            copy_lock: None,
            next_copy_id: 1,
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub(crate) fn is_copy_active(&self, id: u64) -> bool {
        self.copy_lock == Some(id)
    }

    pub(crate) fn unlock_copy(&mut self, id: u64) {
        if self.copy_lock == Some(id) {
            self.copy_lock = None;
        }
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.copy_lock.is_some() {
            return Err(Error::InvalidUsage(
                "This session is locked by an active copy operation.".into(),
            ));
        }
        Ok(())
    }

    /// Close the socket after a fatal error and release any copy lock.
    pub(crate) fn abort(&mut self) {
        self.transport.close();
        self.copy_lock = None;
    }

    /// Write Parse unless an identical statement is cached; returns the statement name.
    fn prepare(&mut self, statement: &SimpleQuery, oids: Vec<Oid>, one_shot: bool) -> String {
        let sql = statement.native_sql();
        if one_shot {
            tracing::debug!(" FE=> Parse(stmt=unnamed,query=\"{sql}\")");
            write_parse(self.transport.out(), "", &sql, &oids);
            self.pending_parse.push_back(None);
            return String::new();
        }

        if let Some(cached) = self.statements.get(&sql) {
            if cached.oids == oids {
                return cached.name.clone();
            }
            tracing::debug!(" FE=> CloseStatement({})", cached.name);
            write_close_statement(self.transport.out(), &cached.name);
            self.statements.remove(&sql);
        }

        let name = format!("S_{}", self.next_statement);
        self.next_statement += 1;
        tracing::debug!(" FE=> Parse(stmt={name},query=\"{sql}\")");
        write_parse(self.transport.out(), &name, &sql, &oids);
        self.pending_parse.push_back(Some(sql.clone()));
        self.statements.insert(
            sql,
            CachedStatement {
                name: name.clone(),
                oids,
            },
        );
        name
    }

    /// Forget statements whose ParseComplete never arrived.
    fn drop_unacknowledged_parses(&mut self) {
        for sql in self.pending_parse.drain(..).flatten() {
            tracing::debug!("statement for \"{sql}\" was not parsed, uncached");
            self.statements.remove(&sql);
        }
    }

    fn value_block(&mut self, params: &mut SimpleParameterList) -> Result<ValueBlock> {
        let encoding = self.transport.encoding();
        let count = params.param_count();
        let mut lens = Vec::with_capacity(count);
        // two i16 counts plus one i16 format code per parameter
        let mut size = 2 + 2 * count + 2;
        for i in 1..=count {
            let len = params.wire_len(i, encoding)?;
            size += 4 + len.unwrap_or(0);
            lens.push(len);
        }
        Ok(ValueBlock { lens, size })
    }

    /// Write format codes and values. A failed stream is zero-padded and returned.
    fn send_values(
        &mut self,
        params: &mut SimpleParameterList,
        block: &ValueBlock,
    ) -> Result<Option<std::io::Error>> {
        let count = i16::try_from(block.lens.len()).map_err(|_| {
            Error::InvalidParameterValue(format!(
                "Too many parameters: {}, at most 32767 are supported.",
                block.lens.len()
            ))
        })?;
        let transport = &mut self.transport;
        transport.send_i16(count);
        for i in 1..=block.lens.len() {
            transport.send_i16(i16::from(params.is_binary(i)));
        }
        transport.send_i16(count);

        let mut failure = None;
        for (i, len) in (1..).zip(&block.lens) {
            let Some(len) = *len else {
                transport.send_i32(-1);
                continue;
            };
            transport.send_i32(wire_len(len)?);
            if let Some(ParamValue::Stream(stream)) = params.value_mut(i)? {
                if let Some(e) = transport.send_stream(stream.reader(), len)? {
                    failure.get_or_insert(e);
                }
                continue;
            }
            match params.value(i)? {
                Some(ParamValue::Binary(data)) => transport.send_bytes(data),
                _ => transport.send_bytes(params.encoded(i).unwrap_or_default()),
            }
        }
        Ok(failure)
    }

    /// Bind the unnamed portal to `statement`.
    fn send_bind(
        &mut self,
        statement: &str,
        params: &mut SimpleParameterList,
    ) -> Result<Option<std::io::Error>> {
        let block = self.value_block(params)?;
        // length, portal name, statement name, values, result format count
        let len = 4 + 1 + statement.len() + 1 + block.size + 2;
        tracing::debug!(" FE=> Bind(stmt={statement},portal=unnamed)");
        self.transport.send_u8(msg_type::BIND);
        self.transport.send_i32(wire_len(len)?);
        self.transport.send_u8(0);
        self.transport.send_cstr(statement);
        let failure = self.send_values(params, &block)?;
        self.transport.send_i16(0);
        Ok(failure)
    }

    /// Unnamed Parse/Bind/Execute of BEGIN, without Describe.
    fn send_begin(&mut self) {
        tracing::debug!(" FE=> Parse/Bind/Execute(BEGIN)");
        let out = self.transport.out();
        write_parse(out, "", "BEGIN", &[]);
        out.extend_from_slice(&[msg_type::BIND, 0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 0]);
        write_execute(out, "", 0);
        self.pending_parse.push_back(None);
    }

    fn send_query(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        implicit_begin: bool,
        max_rows: u32,
        flags: QueryFlags,
    ) -> Result<Option<std::io::Error>> {
        if implicit_begin {
            self.send_begin();
        }
        let limit = if flags.no_results { 1 } else { max_rows };
        let mut failure = None;
        for (statement, sub) in query.statements().iter().zip(params.subparams_mut()) {
            let name = self.prepare(statement, sub.type_oids(), flags.one_shot);
            if let Some(e) = self.send_bind(&name, sub)? {
                failure = Some(e);
                break;
            }
            if !flags.no_metadata {
                write_describe_portal(self.transport.out(), "");
            }
            tracing::debug!(" FE=> Execute(portal=unnamed,limit={limit})");
            write_execute(self.transport.out(), "", limit);
        }
        tracing::debug!(" FE=> Sync");
        write_sync(self.transport.out());
        self.transport.flush()?;
        Ok(failure)
    }

    fn send_describe(&mut self, query: &Query, params: &ParameterList) -> Result<()> {
        for (statement, sub) in query.statements().iter().zip(params.subparams()) {
            let sql = statement.native_sql();
            tracing::debug!(" FE=> Parse(stmt=unnamed,query=\"{sql}\") Describe(statement)");
            write_parse(self.transport.out(), "", &sql, &sub.type_oids());
            write_describe_statement(self.transport.out(), "");
            self.pending_parse.push_back(None);
        }
        write_sync(self.transport.out());
        self.transport.flush()
    }

    pub(crate) fn recv_notification(&mut self) -> Result<()> {
        let notification = NotificationResponse::parse(self.transport.payload())?;
        tracing::debug!(
            " <=BE AsyncNotify({},{},{})",
            notification.pid,
            notification.channel,
            notification.payload
        );
        self.state.notifications.push(Notification {
            pid: notification.pid,
            channel: notification.channel.to_owned(),
            payload: notification.payload.to_owned(),
        });
        Ok(())
    }

    pub(crate) fn recv_parameter_status(&mut self) -> Result<()> {
        let status = ParameterStatus::parse(self.transport.payload())?;
        self.state.apply_parameter(status.name, status.value)
    }

    pub(crate) fn recv_ready(&mut self) -> Result<()> {
        let ready = ReadyForQuery::parse(self.transport.payload())?;
        tracing::debug!(" <=BE ReadyForQuery({:?})", ready.status);
        self.state.transaction_status = ready.status;
        self.drop_unacknowledged_parses();
        Ok(())
    }

    fn process_results(
        &mut self,
        dispatch: &mut Dispatch<'_>,
        buffer: &mut RowBuffer,
        mut describe: Option<&mut ParameterList>,
        flags: QueryFlags,
    ) -> Result<()> {
        let mut described = 0;
        loop {
            let (tag, len) = self.transport.recv_header()?;
            let kind = BackendTag::from_byte(tag)?;
            if kind == BackendTag::DataRow {
                if !self.transport.try_recv_payload(len)? {
                    buffer.out_of_memory(dispatch);
                    continue;
                }
                match DataRow::decode(self.transport.payload())? {
                    Some(row) => buffer.push(row),
                    None => buffer.out_of_memory(dispatch),
                }
                continue;
            }
            self.transport.recv_payload(len)?;
            let payload = self.transport.payload();

            match kind {
                BackendTag::ParseComplete => {
                    tracing::debug!(" <=BE ParseComplete");
                    self.pending_parse.pop_front();
                }
                BackendTag::BindComplete | BackendTag::CloseComplete | BackendTag::NoData => {}
                BackendTag::ParameterDescription => {
                    let oids = ParameterDescription::parse(payload)?;
                    tracing::debug!(" <=BE ParameterDescription({oids:?})");
                    if let Some(params) = describe.as_deref_mut() {
                        if let Some(sub) = params.subparams_mut().get_mut(described) {
                            for (i, oid) in (1..).zip(oids) {
                                sub.resolve_type(i, oid);
                            }
                        }
                        described += 1;
                    }
                }
                BackendTag::PortalSuspended => {
                    tracing::debug!(" <=BE PortalSuspended");
                    if let Some((fields, rows)) = buffer.take() {
                        dispatch.rows(&fields, rows);
                    }
                }
                BackendTag::CommandComplete => {
                    let status = CommandComplete::parse(payload)?.to_owned();
                    tracing::debug!(" <=BE CommandStatus({status})");
                    dispatch.complete(buffer, &status, flags.both_rows_and_status);
                }
                BackendTag::ErrorResponse => {
                    let error = ErrorResponse::parse(payload)?;
                    tracing::debug!(" <=BE ErrorMessage({})", error.fields);
                    dispatch.error(error.into_error());
                }
                BackendTag::EmptyQueryResponse => {
                    tracing::debug!(" <=BE EmptyQuery");
                    dispatch.status("EMPTY");
                }
                BackendTag::NoticeResponse => {
                    let warning = parse_fields(payload)?;
                    tracing::debug!(" <=BE NoticeResponse({warning})");
                    dispatch.warning(warning);
                }
                BackendTag::ParameterStatus => self.recv_parameter_status()?,
                BackendTag::RowDescription => {
                    let fields = RowDescription::parse(payload)?;
                    tracing::debug!(" <=BE RowDescription({})", fields.len());
                    if describe.is_some() {
                        dispatch.rows(&fields, Vec::new());
                    } else {
                        buffer.start(fields);
                    }
                }
                BackendTag::ReadyForQuery => return self.recv_ready(),
                BackendTag::NotificationResponse => self.recv_notification()?,
                BackendTag::CopyInResponse => {
                    tracing::debug!(" FE=> CopyFail");
                    write_copy_fail(self.transport.out(), COPY_VIA_EXECUTE);
                    self.transport.flush()?;
                    dispatch.error(Error::NotImplemented(COPY_VIA_EXECUTE.into()));
                }
                BackendTag::CopyOutResponse | BackendTag::CopyBothResponse => {
                    dispatch.error(Error::NotImplemented(COPY_VIA_EXECUTE.into()));
                }
                BackendTag::CopyData | BackendTag::CopyDone => {}
                BackendTag::Authentication
                | BackendTag::BackendKeyData
                | BackendTag::DataRow
                | BackendTag::FunctionCallResponse
                | BackendTag::NegotiateProtocolVersion => return Err(unknown_tag(tag)),
            }
        }
    }

    fn send_function_call(
        &mut self,
        fnid: i32,
        params: &mut SimpleParameterList,
        implicit_begin: bool,
    ) -> Result<Option<std::io::Error>> {
        if implicit_begin {
            self.send_begin();
        }
        let block = self.value_block(params)?;
        // length, function oid, values, binary result format
        let len = 4 + 4 + block.size + 2;
        tracing::debug!(" FE=> FunctionCall({fnid}, {} params)", block.lens.len());
        self.transport.send_u8(msg_type::FUNCTION_CALL);
        self.transport.send_i32(wire_len(len)?);
        self.transport.send_i32(fnid);
        let failure = self.send_values(params, &block)?;
        self.transport.send_i16(1);
        write_sync(self.transport.out());
        self.transport.flush()?;
        Ok(failure)
    }

    fn recv_function_result(&mut self, implicit_begin: bool) -> Result<Option<Vec<u8>>> {
        let mut errors = ErrorChain::new();
        let mut begin = if implicit_begin {
            BeginState::AwaitingBeginAck
        } else {
            BeginState::Forwarding
        };
        let mut value = None;
        loop {
            let tag = self.transport.recv_message()?;
            let payload = self.transport.payload();
            match BackendTag::from_byte(tag)? {
                BackendTag::FunctionCallResponse => {
                    value = FunctionCallResponse::parse(payload)?;
                    tracing::debug!(" <=BE FunctionCallResponse");
                }
                BackendTag::ParseComplete => {
                    self.pending_parse.pop_front();
                }
                BackendTag::BindComplete => {}
                BackendTag::CommandComplete => {
                    let status = CommandComplete::parse(payload)?;
                    if begin == BeginState::AwaitingBeginAck && status == "BEGIN" {
                        begin = BeginState::Forwarding;
                    } else {
                        errors.push(Error::UnexpectedResponse(format!(
                            "Unexpected command status: {status}."
                        )));
                    }
                }
                BackendTag::ErrorResponse => {
                    errors.push(ErrorResponse::parse(payload)?.into_error());
                }
                BackendTag::NoticeResponse => {
                    let warning = parse_fields(payload)?;
                    self.state.warnings.push(warning);
                }
                BackendTag::ParameterStatus => self.recv_parameter_status()?,
                BackendTag::NotificationResponse => self.recv_notification()?,
                BackendTag::ReadyForQuery => {
                    self.recv_ready()?;
                    errors.into_result()?;
                    return Ok(value);
                }
                _ => return Err(unknown_tag(tag)),
            }
        }
    }

    fn drain_async(&mut self) -> Result<()> {
        while self.transport.has_pending()? {
            let tag = self.transport.recv_message()?;
            match tag {
                b'A' => self.recv_notification()?,
                b'E' => {
                    return Err(ErrorResponse::parse(self.transport.payload())?.into_error());
                }
                b'N' => {
                    let warning = parse_fields(self.transport.payload())?;
                    self.state.warnings.push(warning);
                }
                other => return Err(unknown_tag(other)),
            }
        }
        Ok(())
    }

    fn fail<T>(&mut self, error: Error) -> Result<T> {
        if error.is_fatal() {
            self.abort();
        }
        Err(error)
    }

    /// Send the COPY statement and wait for the server to enter copy mode.
    pub(crate) fn start_copy(
        &mut self,
        sql: &str,
        suppress_begin: bool,
    ) -> Result<CopyOperation<'_>> {
        self.ensure_unlocked()?;
        let implicit_begin =
            !suppress_begin && self.state.transaction_status == TransactionStatus::Idle;
        match self.begin_copy(sql, implicit_begin) {
            Ok((kind, response)) => {
                let id = self.next_copy_id;
                self.next_copy_id += 1;
                self.copy_lock = Some(id);
                Ok(CopyOperation::new(self, id, kind, response))
            }
            Err(e) => self.fail(e),
        }
    }

    fn begin_copy(&mut self, sql: &str, implicit_begin: bool) -> Result<(BackendTag, CopyResponse)> {
        if implicit_begin {
            tracing::debug!(" FE=> Query(BEGIN)");
            write_query(self.transport.out(), "BEGIN");
        }
        tracing::debug!(" FE=> Query({sql})");
        write_query(self.transport.out(), sql);
        self.transport.flush()?;

        let mut errors = ErrorChain::new();
        let mut expected_ready = if implicit_begin { 2 } else { 1 };
        while expected_ready > 0 {
            let tag = self.transport.recv_message()?;
            let payload = self.transport.payload();
            match BackendTag::from_byte(tag)? {
                kind @ (BackendTag::CopyInResponse | BackendTag::CopyOutResponse) => {
                    let response = CopyResponse::parse(payload)?;
                    tracing::debug!(" <=BE {kind:?}");
                    return Ok((kind, response));
                }
                BackendTag::ReadyForQuery => {
                    self.recv_ready()?;
                    expected_ready -= 1;
                }
                BackendTag::CommandComplete
                | BackendTag::RowDescription
                | BackendTag::DataRow
                | BackendTag::EmptyQueryResponse => {}
                BackendTag::ErrorResponse => {
                    errors.push(ErrorResponse::parse(payload)?.into_error());
                }
                BackendTag::NoticeResponse => {
                    let warning = parse_fields(payload)?;
                    self.state.warnings.push(warning);
                }
                BackendTag::ParameterStatus => self.recv_parameter_status()?,
                BackendTag::NotificationResponse => self.recv_notification()?,
                _ => return Err(unknown_tag(tag)),
            }
        }

        let mut chain = ErrorChain::new();
        chain.push(no_copy_mode());
        if let Err(e) = errors.into_result() {
            chain.push(e);
        }
        chain.into_result()?;
        Err(no_copy_mode())
    }
}

fn no_copy_mode() -> Error {
    Error::UnexpectedResponse("The server did not enter copy mode for the statement.".into())
}

impl SessionProtocol for ModernSession {
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
        3
    }

    fn execute(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        handler: &mut dyn ResultHandler,
        max_rows: u32,
        flags: QueryFlags,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        params.check_all_set()?;

        if flags.describe_only {
            let mut dispatch = Dispatch::new(handler, false);
            let mut buffer = RowBuffer::new(0, true);
            let mut result = self.send_describe(query, params);
            if result.is_ok() {
                result = self.process_results(&mut dispatch, &mut buffer, Some(params), flags);
            }
            if let Err(e) = result {
                self.abort();
                dispatch.error(e);
            }
            return dispatch.finish();
        }

        let implicit_begin =
            !flags.suppress_begin && self.state.transaction_status == TransactionStatus::Idle;
        let mut dispatch = Dispatch::new(handler, implicit_begin);
        let failure = match self.send_query(query, params, implicit_begin, max_rows, flags) {
            Ok(failure) => failure,
            Err(e) => {
                self.abort();
                dispatch.error(e);
                return dispatch.finish();
            }
        };

        let mut buffer = RowBuffer::new(max_rows, flags.no_results);
        if let Err(e) = self.process_results(&mut dispatch, &mut buffer, None, flags) {
            self.abort();
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
        self.ensure_unlocked()?;
        params.check_all_set()?;
        let implicit_begin =
            !suppress_begin && self.state.transaction_status == TransactionStatus::Idle;
        let failure = match self.send_function_call(fnid, params, implicit_begin) {
            Ok(failure) => failure,
            Err(e) => return self.fail(e),
        };
        let value = match self.recv_function_result(implicit_begin) {
            Ok(value) => value,
            Err(e) => return self.fail(e),
        };
        if let Some(cause) = failure {
            return Err(bind_failure(&cause));
        }
        Ok(value)
    }

    fn process_notifies(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
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
        self.abort();
    }
}

impl Drop for ModernSession {
    fn drop(&mut self) {
        self.close();
    }
}
