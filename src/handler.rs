//! Result handlers.
//!
//! One execute call drives exactly one handler. Callbacks arrive in server
//! order; for a statement that returns rows:
//!
//! ```text
//! handle_result_rows → handle_command_status
//! ```
//!
//! and for a statement without rows only `handle_command_status`. Errors and
//! warnings may interleave. `handle_completion` is called last, once per
//! execute, and its return value is the outcome of the call.

use crate::error::{Error, ErrorChain, ErrorFields, Result};
use crate::row::{Field, Row};

pub trait ResultHandler {
    /// Rows of one statement, delivered as a block.
    fn handle_result_rows(&mut self, fields: &[Field], rows: Vec<Row>) {
        let _ = (fields, rows);
    }

    /// Command tag of one finished statement with the counts it carries.
    fn handle_command_status(&mut self, status: &str, update_count: u64, insert_oid: u32) {
        let _ = (status, update_count, insert_oid);
    }

    fn handle_warning(&mut self, warning: ErrorFields);

    fn handle_error(&mut self, error: Error);

    /// Called once after the last callback of an execute.
    fn handle_completion(&mut self) -> Result<()>;
}

/// Rows of one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub status: String,
    pub update_count: u64,
    pub insert_oid: u32,
}

/// Handler that keeps everything it is given.
///
/// Errors are chained and surface from `handle_completion`.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Vec<ResultSet>,
    statuses: Vec<CommandStatus>,
    warnings: Vec<ErrorFields>,
    errors: ErrorChain,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[ResultSet] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ResultSet> {
        self.results
    }

    pub fn statuses(&self) -> &[CommandStatus] {
        &self.statuses
    }

    pub fn warnings(&self) -> &[ErrorFields] {
        &self.warnings
    }

    /// Update count of the last command, if any command completed.
    pub fn update_count(&self) -> Option<u64> {
        self.statuses.last().map(|s| s.update_count)
    }
}

impl ResultHandler for ResultCollector {
    fn handle_result_rows(&mut self, fields: &[Field], rows: Vec<Row>) {
        self.results.push(ResultSet {
            fields: fields.to_vec(),
            rows,
        });
    }

    fn handle_command_status(&mut self, status: &str, update_count: u64, insert_oid: u32) {
        self.statuses.push(CommandStatus {
            status: status.to_owned(),
            update_count,
            insert_oid,
        });
    }

    fn handle_warning(&mut self, warning: ErrorFields) {
        self.warnings.push(warning);
    }

    fn handle_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    fn handle_completion(&mut self) -> Result<()> {
        std::mem::take(&mut self.errors).into_result()
    }
}

/// Handler that discards results and only reports errors.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
    errors: ErrorChain,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl ResultHandler for DropHandler {
    fn handle_command_status(&mut self, _status: &str, update_count: u64, _insert_oid: u32) {
        self.rows_affected = Some(update_count);
    }

    fn handle_warning(&mut self, warning: ErrorFields) {
        tracing::debug!("discarding warning: {warning}");
    }

    fn handle_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    fn handle_completion(&mut self) -> Result<()> {
        std::mem::take(&mut self.errors).into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_chains_errors() {
        let mut collector = ResultCollector::new();
        collector.handle_result_rows(&[Field::new("a", 23)], vec![Row::new(vec![None])]);
        collector.handle_command_status("SELECT 1", 1, 0);
        collector.handle_error(Error::UnexpectedResponse("one".into()));
        collector.handle_error(Error::UnexpectedResponse("two".into()));

        let Err(Error::Multiple(errors)) = collector.handle_completion() else {
            panic!("expected chained errors");
        };
        assert_eq!(errors.len(), 2);
        assert!(collector.handle_completion().is_ok());
        assert_eq!(collector.results()[0].fields[0].label, "a");
        assert_eq!(collector.update_count(), Some(1));
    }

    #[test]
    fn drop_handler_counts() {
        let mut handler = DropHandler::new();
        handler.handle_command_status("UPDATE 4", 4, 0);
        assert_eq!(handler.rows_affected(), Some(4));
        assert!(handler.handle_completion().is_ok());
    }
}
