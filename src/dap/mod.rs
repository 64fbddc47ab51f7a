//! Debug Adapter Protocol façade.
//!
//! Translates DAP requests into engine calls and forwards engine events to the client.
//! Requests are handled one by one on the dispatch loop; events are written by a
//! forwarder thread, both through a shared [`DapOutput`].

pub mod logger;
pub mod protocol;
pub mod transport;

use crate::client::{DebuggerMode, StepKind};
use crate::config::DebuggerOptions;
use crate::engine::{
    ConfirmedBreakpoint, DebugListener, DebugRegistry, SourceBreakpoint, StepOutcome,
    UNKNOWN_SOURCE,
};
use crate::error::Error;
use crate::frontend::{DebugEvent, EventSink, Frontend, OutputCategory};
use anyhow::{anyhow, Context};
use protocol::{AttachArguments, DapEvent, DapRequest, DapResponse, SetBreakpointsArguments};
use serde_json::{json, Value};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use transport::{MessageReader, MessageWriter};

struct OutputState {
    seq: i64,
    writer: Box<dyn MessageWriter>,
}

/// Writing side of a DAP connection, shared by the dispatch loop, the event
/// forwarder and the [`logger::DapLogger`].
#[derive(Clone)]
pub struct DapOutput {
    state: Arc<Mutex<OutputState>>,
}

impl DapOutput {
    pub fn new(writer: impl MessageWriter + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                seq: 1,
                writer: Box::new(writer),
            })),
        }
    }

    fn send_response_raw(
        &self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let rsp = DapResponse {
            seq: state.seq,
            r#type: "response",
            request_seq: req.seq,
            success,
            command: req.command.clone(),
            message,
            body,
        };
        state.seq += 1;
        let rsp = serde_json::to_value(rsp)?;
        state.writer.write_message(&rsp)
    }

    pub fn send_success(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, None)
    }

    pub fn send_success_body(&self, req: &DapRequest, body: Value) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, Some(body))
    }

    pub fn send_err(&self, req: &DapRequest, message: impl ToString) -> anyhow::Result<()> {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    pub fn send_event(&self, name: &'static str, body: Option<Value>) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let ev = DapEvent {
            seq: state.seq,
            r#type: "event",
            event: name,
            body,
        };
        state.seq += 1;
        let ev = serde_json::to_value(ev)?;
        state.writer.write_message(&ev)
    }
}

/// DAP name and body of an engine event.
pub fn event_message(event: &DebugEvent) -> (&'static str, Option<Value>) {
    match event {
        DebugEvent::Initialized => ("initialized", None),
        DebugEvent::Stopped { reason, thread_id } => (
            "stopped",
            Some(json!({
                "reason": reason.to_string(),
                "threadId": thread_id,
                "allThreadsStopped": false,
            })),
        ),
        DebugEvent::Continued { thread_id } => (
            "continued",
            Some(json!({"threadId": thread_id, "allThreadsContinued": false})),
        ),
        DebugEvent::ThreadStarted { thread_id } => (
            "thread",
            Some(json!({"reason": "started", "threadId": thread_id})),
        ),
        DebugEvent::ThreadExited { thread_id } => (
            "thread",
            Some(json!({"reason": "exited", "threadId": thread_id})),
        ),
        DebugEvent::Terminated => ("terminated", None),
        DebugEvent::Output { category, output } => (
            "output",
            Some(json!({"category": category.to_string(), "output": output})),
        ),
    }
}

/// Write engine events to the client until every event sender is gone.
fn forward_events(events: Receiver<DebugEvent>, output: DapOutput) {
    for event in events {
        let (name, body) = event_message(&event);
        if let Err(e) = output.send_event(name, body) {
            log::warn!(target: "dap", "event forwarding stopped: {e:#}");
            break;
        }
    }
}

/// Answers engine prompts from configuration and reports errors as `output` events.
pub struct DapFrontend {
    options: DebuggerOptions,
    events: EventSink,
}

impl DapFrontend {
    pub fn new(options: DebuggerOptions, events: EventSink) -> Self {
        Self { options, events }
    }

    fn important(&self, output: String) {
        self.events.emit(DebugEvent::Output {
            category: OutputCategory::Important,
            output,
        });
    }
}

impl Frontend for DapFrontend {
    fn confirm_takeover(&self, conflict_text: &str) -> bool {
        let decision = if self.options.takeover {
            "taking over"
        } else {
            "not taking over"
        };
        self.important(format!("{conflict_text} ({decision})\n"));
        self.options.takeover
    }

    fn confirm_close(&self, error: &str) -> bool {
        self.important(format!("Error listening to the debugger: {error}\n"));
        self.options.close_on_listen_error
    }

    fn notify_error(&self, message: &str) {
        self.important(format!("{message}\n"));
    }
}

/// One DAP client connection.
pub struct DebugAdapter {
    registry: Arc<DebugRegistry>,
    output: DapOutput,
    events: EventSink,
    frontend: Arc<dyn Frontend>,
    connection_id: Option<String>,
    listener: Option<Arc<DebugListener>>,
}

impl DebugAdapter {
    pub fn new(registry: Arc<DebugRegistry>, writer: impl MessageWriter + 'static) -> Self {
        let output = DapOutput::new(writer);
        let (events, receiver) = EventSink::channel();

        let forwarder_output = output.clone();
        thread::spawn(move || forward_events(receiver, forwarder_output));

        let frontend = Arc::new(DapFrontend::new(
            registry.options().clone(),
            events.clone(),
        ));
        Self {
            registry,
            output,
            events,
            frontend,
            connection_id: None,
            listener: None,
        }
    }

    /// Use another source of user decisions.
    pub fn with_frontend(self, frontend: Arc<dyn Frontend>) -> Self {
        Self { frontend, ..self }
    }

    pub fn output(&self) -> DapOutput {
        self.output.clone()
    }

    pub fn listener(&self) -> Option<Arc<DebugListener>> {
        self.listener.clone()
    }

    fn attached(&self, command: &str) -> anyhow::Result<Arc<DebugListener>> {
        self.listener
            .clone()
            .ok_or_else(|| anyhow!("{command}: debugger not attached"))
    }

    fn handle_initialize(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsTerminateRequest": true,
            "supportsConditionalBreakpoints": true,
            "supportsBreakpointLocationsRequest": true,
            "supportsSetVariable": true,
            "supportsEvaluateForHovers": true,
            "supportsRestartRequest": false,
            "supportsStepBack": false,
        });
        self.output.send_success_body(req, body)
    }

    fn handle_attach(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: AttachArguments =
            serde_json::from_value(req.arguments.clone()).context("attach: invalid arguments")?;
        let mode = if args.terminal_mode {
            DebuggerMode::Terminal
        } else {
            DebuggerMode::User
        };

        let listener = self.registry.start(
            &args.conn_id,
            mode,
            self.frontend.clone(),
            self.events.clone(),
        )?;
        log::info!(
            target: "dap",
            "attached to {} ({mode} mode, session {})",
            args.conn_id,
            listener.session_number()
        );
        self.connection_id = Some(args.conn_id);
        self.listener = Some(listener);

        self.output.send_success(req)?;
        self.events.emit(DebugEvent::Initialized);
        Ok(())
    }

    fn handle_set_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetBreakpointsArguments = serde_json::from_value(req.arguments.clone())
            .context("setBreakpoints: invalid arguments")?;
        let path = args
            .source
            .path
            .ok_or_else(|| anyhow!("setBreakpoints: missing arguments.source.path"))?;
        let requested: Vec<SourceBreakpoint> = args
            .breakpoints
            .into_iter()
            .map(|bp| SourceBreakpoint {
                line: bp.line,
                column: bp.column,
                condition: bp.condition.filter(|c| !c.trim().is_empty()),
            })
            .collect();

        let confirmed = match &self.listener {
            Some(listener) => listener.set_breakpoints(&path, &requested)?,
            None => vec![],
        };

        let breakpoints: Vec<Value> = if confirmed.is_empty() && !requested.is_empty() {
            requested
                .iter()
                .map(|bp| json!({"verified": false, "line": bp.line}))
                .collect()
        } else {
            confirmed.iter().map(breakpoint_json).collect()
        };
        self.output
            .send_success_body(req, json!({"breakpoints": breakpoints}))
    }

    fn handle_breakpoint_locations(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let line = req
            .arguments
            .get("line")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("breakpointLocations: missing arguments.line"))?;
        self.output
            .send_success_body(req, json!({"breakpoints": [{"line": line}]}))
    }

    fn handle_threads(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let threads: Vec<Value> = self
            .listener
            .as_ref()
            .map(|l| l.threads())
            .unwrap_or_default()
            .into_iter()
            .map(|(id, name)| json!({"id": id, "name": name}))
            .collect();
        self.output
            .send_success_body(req, json!({"threads": threads}))
    }

    fn handle_stack_trace(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("stackTrace")?;
        let thread_id = req
            .arguments
            .get("threadId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("stackTrace: missing arguments.threadId"))?;
        let start = req
            .arguments
            .get("startFrame")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let levels = req
            .arguments
            .get("levels")
            .and_then(|v| v.as_u64())
            .filter(|l| *l > 0)
            .map(|l| l as usize);

        let stack = listener.stack_trace(thread_id)?;
        let frames: Vec<Value> = stack
            .iter()
            .skip(start)
            .take(levels.unwrap_or(usize::MAX))
            .map(|f| {
                let source = if f.source_path == UNKNOWN_SOURCE {
                    json!({"name": UNKNOWN_SOURCE, "path": UNKNOWN_SOURCE})
                } else {
                    json!({"path": f.source_path})
                };
                json!({
                    "id": f.id,
                    "name": f.name,
                    "source": source,
                    "line": f.line,
                    "column": f.column,
                })
            })
            .collect();

        self.output.send_success_body(
            req,
            json!({"stackFrames": frames, "totalFrames": stack.len()}),
        )
    }

    fn handle_scopes(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("scopes")?;
        let frame_id = req
            .arguments
            .get("frameId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("scopes: missing arguments.frameId"))?;

        let scopes: Vec<Value> = listener
            .scopes(frame_id)?
            .into_iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "variablesReference": s.variables_reference,
                    "expensive": false,
                })
            })
            .collect();
        self.output.send_success_body(req, json!({"scopes": scopes}))
    }

    fn handle_variables(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("variables")?;
        let reference = req
            .arguments
            .get("variablesReference")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("variables: missing arguments.variablesReference"))?;

        let variables: Vec<Value> = listener
            .variables(reference)?
            .into_iter()
            .map(|v| {
                let mut var = json!({
                    "name": v.name,
                    "value": v.value,
                    "type": v.type_name,
                    "variablesReference": v.variables_reference,
                });
                if let Some(indexed) = v.indexed_variables {
                    var["indexedVariables"] = json!(indexed);
                }
                var
            })
            .collect();
        self.output
            .send_success_body(req, json!({"variables": variables}))
    }

    fn handle_set_variable(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("setVariable")?;
        let reference = req
            .arguments
            .get("variablesReference")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("setVariable: missing arguments.variablesReference"))?;
        let name = req
            .arguments
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("setVariable: missing arguments.name"))?;
        let value = req
            .arguments
            .get("value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("setVariable: missing arguments.value"))?;

        let result = listener.set_variable(reference, name, value);
        match result.value {
            Some(value) if result.success => {
                self.output.send_success_body(req, json!({"value": value}))
            }
            _ => self.output.send_err(req, format!("failed to set {name}")),
        }
    }

    fn handle_evaluate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("evaluate")?;
        let expression = req
            .arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("evaluate: missing arguments.expression"))?;
        let frame_id = req.arguments.get("frameId").and_then(|v| v.as_i64());

        match listener.evaluate(expression, frame_id)? {
            Some(v) => self.output.send_success_body(
                req,
                json!({
                    "result": v.value,
                    "type": v.type_name,
                    "variablesReference": v.variables_reference,
                }),
            ),
            None => self
                .output
                .send_err(req, format!("{expression} not found")),
        }
    }

    fn thread_id(req: &DapRequest) -> anyhow::Result<i64> {
        req.arguments
            .get("threadId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("{}: missing arguments.threadId", req.command))
    }

    /// Stepping requests complete before the response is sent, failures are inline.
    fn handle_step(&mut self, req: &DapRequest, kind: StepKind) -> anyhow::Result<()> {
        let listener = self.attached(&req.command)?;
        let thread_id = Self::thread_id(req)?;

        match listener.step(thread_id, kind, None)? {
            StepOutcome::Stopped | StepOutcome::Ended => self.output.send_success(req),
            StepOutcome::Failed(message) => self.output.send_err(req, message),
        }
    }

    /// Continue runs until the next breakpoint, so it is answered immediately.
    fn handle_continue(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let listener = self.attached("continue")?;
        let thread_id = Self::thread_id(req)?;
        // fail fast on an unknown thread
        listener.session(thread_id)?;

        self.output
            .send_success_body(req, json!({"allThreadsContinued": false}))?;

        let frontend = self.frontend.clone();
        thread::spawn(move || {
            match listener.step(thread_id, StepKind::StepContinue, None) {
                Ok(StepOutcome::Failed(message)) => frontend.notify_error(&message),
                Err(e) => frontend.notify_error(&e.to_string()),
                Ok(_) => {}
            }
        });
        Ok(())
    }

    fn detach(&mut self) {
        self.listener = None;
        if let Some(connection_id) = self.connection_id.take() {
            log::info!(target: "dap", "detaching from {connection_id}");
            self.registry.stop(&connection_id);
        }
    }

    fn handle_disconnect(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.detach();
        self.output.send_success(req)
    }

    fn handle_terminate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.detach();
        self.output.send_success(req)?;
        self.events.emit(DebugEvent::Terminated);
        Ok(())
    }

    /// Handle one request. Returns `false` when the client disconnected.
    pub fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        match req.command.as_str() {
            "initialize" => self.handle_initialize(req)?,
            "attach" => self.handle_attach(req)?,
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "breakpointLocations" => self.handle_breakpoint_locations(req)?,
            "configurationDone" => self.output.send_success(req)?,
            "threads" => self.handle_threads(req)?,
            "stackTrace" => self.handle_stack_trace(req)?,
            "scopes" => self.handle_scopes(req)?,
            "variables" => self.handle_variables(req)?,
            "setVariable" => self.handle_set_variable(req)?,
            "evaluate" => self.handle_evaluate(req)?,
            "next" => self.handle_step(req, StepKind::StepOver)?,
            "stepIn" => self.handle_step(req, StepKind::StepInto)?,
            "stepOut" => self.handle_step(req, StepKind::StepReturn)?,
            "continue" => self.handle_continue(req)?,
            "terminate" => self.handle_terminate(req)?,
            "disconnect" => {
                self.handle_disconnect(req)?;
                return Ok(false);
            }
            other => {
                self.output
                    .send_err(req, format!("Unsupported DAP command: {other}"))?;
            }
        }
        Ok(true)
    }

    /// Handle one request, failures become error responses. A failure that leaves
    /// nothing to debug ends the session with `terminated`.
    /// Returns `false` when the client disconnected.
    pub fn serve(&mut self, req: &DapRequest) -> bool {
        let err = match self.dispatch(req) {
            Ok(cont) => return cont,
            Err(e) => e,
        };

        log::warn!(target: "dap", "{} failed: {err:#}", req.command);
        if let Err(e) = self.output.send_err(req, format!("{err:#}")) {
            log::warn!(target: "dap", "error response not sent: {e:#}");
        }
        if err.downcast_ref::<Error>().is_some_and(Error::is_fatal) {
            self.detach();
            self.events.emit(DebugEvent::Terminated);
        }
        true
    }

    /// Serve requests until the client disconnects or the connection closes.
    pub fn run(mut self, mut reader: impl MessageReader) -> anyhow::Result<()> {
        let result = loop {
            let msg = match reader.read_message() {
                Ok(msg) => msg,
                Err(e) => break Err(e),
            };
            let req: DapRequest = match serde_json::from_value(msg) {
                Ok(req) => req,
                Err(e) => {
                    log::warn!(target: "dap", "malformed message: {e}");
                    continue;
                }
            };
            if req.r#type != "request" {
                continue;
            }

            log::debug!(target: "dap", "{}: {}", req.seq, req.command);
            if !self.serve(&req) {
                break Ok(());
            }
        };

        self.detach();
        result
    }
}

fn breakpoint_json(bp: &ConfirmedBreakpoint) -> Value {
    let mut value = json!({"verified": bp.verified(), "line": bp.line});
    if let Some(column) = bp.column {
        value["column"] = json!(column);
    }
    if let Some(message) = &bp.message {
        value["message"] = json!(message);
    }
    value
}
