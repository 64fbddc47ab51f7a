use crate::dap::DapOutput;
use crate::frontend::OutputCategory;
use log::LevelFilter;
use serde_json::json;
use std::fmt::Write as _;

/// Forwards log records to the DAP client as `output` events.
pub struct DapLogger {
    inner: env_logger::Logger,
    output: DapOutput,
}

impl DapLogger {
    pub fn new(output: DapOutput) -> Self {
        Self {
            inner: env_logger::Logger::from_default_env(),
            output,
        }
    }

    pub fn filter(&self) -> LevelFilter {
        self.inner.filter()
    }
}

impl log::Log for DapLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut output = String::new();
        _ = write!(output, "[{}] {} ", record.level(), record.target());
        _ = writeln!(output, "{}", record.args());

        // a log record must never fail the logging thread
        _ = self
            .output
            .send_event(
                "output",
                Some(json!({"category": OutputCategory::Console.to_string(), "output": output})),
            );
    }

    fn flush(&self) {}
}
