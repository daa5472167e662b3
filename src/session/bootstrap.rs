//! Session setup after authentication.
//!
//! Modern servers report their settings with ParameterStatus before the
//! first ReadyForQuery. Legacy servers report nothing, so the session asks
//! with a few setup queries and adjusts its encoding from the answers.

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::handler::ResultCollector;
use crate::protocol::backend::{
    BackendKeyData, ErrorResponse, ParameterStatus, ReadyForQuery, msg_type, parse_fields,
    unknown_tag,
};
use crate::protocol::legacy::notice_fields;
use crate::protocol::types::TransactionStatus;
use crate::query::Query;
use crate::row::Row;
use crate::transport::Transport;

use super::legacy::LegacySession;
use super::{BackendKey, QueryFlags, SessionProtocol, SessionState, version_at_least};

/// Drain the v3 startup messages up to the first ReadyForQuery.
pub(crate) fn modern_startup(transport: &mut Transport, state: &mut SessionState) -> Result<()> {
    loop {
        let tag = transport.recv_message()?;
        let payload = transport.payload();
        match tag {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                tracing::debug!(" <=BE BackendKeyData(pid={})", key.process_id());
                state.backend_key = Some(BackendKey {
                    pid: key.process_id(),
                    secret: key.secret(),
                });
            }
            msg_type::PARAMETER_STATUS => {
                let status = ParameterStatus::parse(payload)?;
                state.apply_parameter(status.name, status.value)?;
            }
            msg_type::NOTICE_RESPONSE => {
                let warning = parse_fields(payload)?;
                tracing::debug!(" <=BE NoticeResponse({warning})");
                state.warnings.push(warning);
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?;
                tracing::debug!(" <=BE ErrorMessage({})", error.fields);
                return Err(Error::UnableToConnect(error.fields.to_string()));
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                tracing::debug!(" <=BE ReadyForQuery({:?})", ready.status);
                state.transaction_status = ready.status;
                return Ok(());
            }
            other => return Err(unknown_tag(other)),
        }
    }
}

/// Drain the v2 startup messages up to the first ReadyForQuery.
pub(crate) fn legacy_startup(transport: &mut Transport, state: &mut SessionState) -> Result<()> {
    loop {
        match transport.recv_u8()? {
            b'K' => {
                let pid = transport.recv_i32()?;
                let secret = transport.recv_i32()?;
                tracing::debug!(" <=BE BackendKeyData(pid={pid})");
                state.backend_key = Some(BackendKey { pid, secret });
            }
            b'N' => {
                let text = transport.recv_cstr()?;
                tracing::debug!(" <=BE NoticeResponse({text})");
                state.warnings.push(notice_fields(&text));
            }
            b'E' => {
                let text = transport.recv_cstr()?;
                tracing::debug!(" <=BE ErrorResponse({text})");
                return Err(Error::UnableToConnect(text.trim().to_owned()));
            }
            b'Z' => {
                tracing::debug!(" <=BE ReadyForQuery");
                state.transaction_status = TransactionStatus::Idle;
                return Ok(());
            }
            other => return Err(unknown_tag(other)),
        }
    }
}

fn unexpected_result() -> Error {
    Error::UnableToConnect("An unexpected result was returned by a query.".into())
}

/// Run one setup statement outside any transaction.
///
/// With `want_row`, the statement must produce exactly one row in total.
fn run_setup(session: &mut LegacySession, sql: &str, want_row: bool) -> Result<Option<Row>> {
    let query = Query::parse(sql, false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    let flags = QueryFlags {
        one_shot: true,
        suppress_begin: true,
        ..QueryFlags::default()
    };
    session
        .execute(&query, &mut params, &mut collector, 0, flags)
        .map_err(|e| Error::UnableToConnect(e.to_string()))?;
    if !want_row {
        return Ok(None);
    }

    let mut rows = collector.into_results().into_iter().flat_map(|set| set.rows);
    match (rows.next(), rows.next()) {
        (Some(row), None) => Ok(Some(row)),
        _ => Err(unexpected_result()),
    }
}

fn text_cell(session: &LegacySession, row: &Row, index: usize) -> Result<String> {
    let bytes = row.get(index).ok_or_else(unexpected_result)?;
    Ok(session.encoding().decode(bytes)?.into_owned())
}

/// Ask a legacy server for its version, encoding and string escaping.
pub(crate) fn legacy_setup(session: &mut LegacySession, charset: Option<&str>) -> Result<()> {
    let row = run_setup(
        session,
        "set datestyle = 'ISO'; select version(), case when pg_encoding_to_char(1) = \
         'SQL_ASCII' then 'UNKNOWN' else getdatabaseencoding() end",
        true,
    )?
    .ok_or_else(unexpected_result)?;
    let version_text = text_cell(session, &row, 0)?;
    let database_encoding = text_cell(session, &row, 1)?;

    // "PostgreSQL 7.4.2 on i686-pc-linux-gnu, ..."
    let version = version_text
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_owned();
    tracing::debug!("legacy server version {version}, database encoding {database_encoding}");

    let encoding = if version_at_least(&version, 7, 3) {
        run_setup(
            session,
            "begin; set autocommit = on; set client_encoding = 'UNICODE'; commit",
            false,
        )?;
        Encoding::Utf8
    } else {
        charset
            .and_then(Encoding::from_server_name)
            .or_else(|| Encoding::from_server_name(&database_encoding))
            .unwrap_or_default()
    };
    session.set_encoding(encoding);

    let standard_conforming_strings = if version_at_least(&version, 8, 1) {
        let row = run_setup(session, "show standard_conforming_strings", true)?
            .ok_or_else(unexpected_result)?;
        text_cell(session, &row, 0)? == "on"
    } else {
        false
    };

    let state = session.state_mut();
    state.server_version = version;
    state.standard_conforming_strings = standard_conforming_strings;
    state
        .parameters
        .insert("client_encoding".to_owned(), encoding.name().to_owned());
    Ok(())
}
