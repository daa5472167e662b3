//! Routing of one request cycle's results into a [`ResultHandler`].

use crate::error::{Error, ErrorFields};
use crate::handler::ResultHandler;
use crate::protocol::backend::query::interpret_command_status;
use crate::row::{Field, Row};

/// Whether the completion of an implicit BEGIN is still expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeginState {
    /// The first command status belongs to the synthetic BEGIN and is swallowed
    AwaitingBeginAck,
    Forwarding,
}

/// The caller's handler plus the implicit-BEGIN flag.
pub(crate) struct Dispatch<'h> {
    handler: &'h mut dyn ResultHandler,
    begin: BeginState,
}

impl<'h> Dispatch<'h> {
    pub fn new(handler: &'h mut dyn ResultHandler, implicit_begin: bool) -> Self {
        let begin = if implicit_begin {
            BeginState::AwaitingBeginAck
        } else {
            BeginState::Forwarding
        };
        Self { handler, begin }
    }

    pub fn begin_state(&self) -> BeginState {
        self.begin
    }

    pub fn rows(&mut self, fields: &[Field], rows: Vec<Row>) {
        match self.begin {
            BeginState::AwaitingBeginAck => {
                tracing::debug!("dropping {} rows received before BEGIN completed", rows.len());
            }
            BeginState::Forwarding => self.handler.handle_result_rows(fields, rows),
        }
    }

    /// Interpret and forward a command status.
    ///
    /// A tag whose counts do not parse is reported and not forwarded.
    pub fn status(&mut self, status: &str) {
        if self.begin == BeginState::AwaitingBeginAck {
            self.begin = BeginState::Forwarding;
            if status != "BEGIN" {
                self.handler.handle_error(Error::UnexpectedResponse(format!(
                    "Expected command status BEGIN, got {status}."
                )));
            }
            return;
        }
        match interpret_command_status(status) {
            Ok(counts) => {
                self.handler
                    .handle_command_status(status, counts.update_count, counts.insert_oid);
            }
            Err(e) => self.handler.handle_error(e),
        }
    }

    /// CommandComplete: flush the pending row set first, if any.
    pub fn complete(&mut self, buffer: &mut RowBuffer, status: &str, both_rows_and_status: bool) {
        match buffer.take() {
            Some((fields, rows)) => {
                self.rows(&fields, rows);
                if both_rows_and_status {
                    self.status(status);
                }
            }
            None => self.status(status),
        }
    }

    pub fn warning(&mut self, warning: ErrorFields) {
        self.handler.handle_warning(warning);
    }

    pub fn error(&mut self, error: Error) {
        self.handler.handle_error(error);
    }

    /// End the cycle; the handler decides the outcome.
    pub fn finish(self) -> crate::error::Result<()> {
        self.handler.handle_completion()
    }
}

/// Rows accumulated for the statement currently producing results.
#[derive(Debug, Default)]
pub(crate) struct RowBuffer {
    fields: Option<Vec<Field>>,
    rows: Vec<Row>,
    max_rows: u32,
    discard: bool,
    oom_reported: bool,
}

impl RowBuffer {
    /// `max_rows == 0` keeps everything. With `discard`, rows are counted
    /// against nothing and never delivered.
    pub fn new(max_rows: u32, discard: bool) -> Self {
        Self {
            max_rows,
            discard,
            ..Self::default()
        }
    }

    /// A RowDescription opens a new row set.
    pub fn start(&mut self, fields: Vec<Field>) {
        self.fields = Some(fields);
        self.rows.clear();
    }

    pub fn fields_mut(&mut self) -> Option<&mut Vec<Field>> {
        self.fields.as_mut()
    }

    fn capped(&self) -> bool {
        self.max_rows > 0 && self.rows.len() >= self.max_rows as usize
    }

    pub fn push(&mut self, row: Row) {
        if self.discard {
            return;
        }
        if self.fields.is_none() {
            // No Describe was sent; the columns are unknown.
            self.fields = Some(Vec::new());
        }
        if self.capped() {
            tracing::trace!("row beyond the {} row limit dropped", self.max_rows);
            return;
        }
        self.rows.push(row);
    }

    /// A row could not be allocated. Reported once, and only while the cap has room.
    pub fn out_of_memory(&mut self, dispatch: &mut Dispatch<'_>) {
        if self.oom_reported || self.capped() {
            return;
        }
        self.oom_reported = true;
        dispatch.error(Error::OutOfMemory(
            "Ran out of memory retrieving query results.".into(),
        ));
    }

    /// Close the open row set, if any.
    pub fn take(&mut self) -> Option<(Vec<Field>, Vec<Row>)> {
        let fields = self.fields.take()?;
        if self.discard {
            return None;
        }
        Some((fields, std::mem::take(&mut self.rows)))
    }
}
