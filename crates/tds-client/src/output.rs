//! Stored procedure outputs.
//!
//! Return status and output parameter tokens do not move the result
//! cursor. They are handed to an [`OutputHandler`] when one is registered
//! on the statement, otherwise collected on it.

use tds_protocol::OutputParameter;

/// Receives return status and output parameters as they are decoded.
pub trait OutputHandler: Send {
    /// The procedure's return status.
    fn on_return_status(&mut self, status: i32);

    /// One output parameter, in arrival order.
    fn on_output_parameter(&mut self, param: OutputParameter);
}

/// Default handler keeping the outputs of the last execution.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutputCollector {
    pub(crate) return_status: Option<i32>,
    pub(crate) params: Vec<OutputParameter>,
}

impl OutputCollector {
    pub(crate) fn clear(&mut self) {
        self.return_status = None;
        self.params.clear();
    }
}

impl OutputHandler for OutputCollector {
    fn on_return_status(&mut self, status: i32) {
        self.return_status = Some(status);
    }

    fn on_output_parameter(&mut self, param: OutputParameter) {
        self.params.push(param);
    }
}
