//! NDJSON driver loop: one request per input line, one response per output
//! line, all against a single running link.

use std::io::{BufRead, Write};
use std::time::Duration;

use brickdrive::{
    BlockCondition, ErrorCode, ErrorInfo, Fulfillment, LinkError, LinkHandle, LinkResult,
    Operation, ReplyOperation, Ticket,
};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One line of driver input.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DriverRequest {
    #[serde(default)]
    request_id: Value,
    action: DriverAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
enum DriverAction {
    /// Fire-and-forget operations, answered once the condition holds.
    Run {
        operations: Vec<Operation>,
        #[serde(default = "crate::default_condition")]
        condition: BlockCondition,
        timeout_ms: Option<u64>,
    },
    /// Reply operations, answered with the decoded replies.
    Read {
        reply_operations: Vec<ReplyOperation>,
        timeout_ms: Option<u64>,
    },
    Telemetry,
    BrickName,
    SetBrickName {
        name: String,
    },
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum ResponseStatus {
    Ok,
    Error,
}

/// One line of driver output.
#[derive(Debug, Serialize)]
struct DriverResponse {
    request_id: Value,
    status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
}

impl DriverResponse {
    fn ok(request_id: Value, result: Value) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    fn error(request_id: Value, error: ErrorInfo) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Error,
            result: None,
            error: Some(error),
        }
    }
}

/// Serve requests from `input` until it is exhausted.
///
/// Link failures and malformed lines are answered with an error response;
/// only failures to read input or write output end the loop early.
pub fn run_driver(handle: &LinkHandle, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line.into_diagnostic()?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<DriverRequest>(&line) {
            Ok(DriverRequest { request_id, action }) => {
                tracing::debug!(request_id = %request_id, "driver request");
                match execute(handle, action) {
                    Ok(result) => DriverResponse::ok(request_id, result),
                    Err(err) => DriverResponse::error(request_id, err.to_error_info()),
                }
            }
            Err(err) => DriverResponse::error(Value::Null, invalid_request(&err, &line)),
        };

        let payload = serde_json::to_string(&response).into_diagnostic()?;
        writeln!(output, "{payload}").into_diagnostic()?;
        output.flush().into_diagnostic()?;
    }
    Ok(())
}

fn invalid_request(err: &serde_json::Error, line: &str) -> ErrorInfo {
    ErrorInfo {
        code: ErrorCode::Protocol.as_str().to_string(),
        message: "invalid driver request".to_string(),
        context: Some(json!({
            "parse_error": err.to_string(),
            "received": line.chars().take(200).collect::<String>(),
            "hint": "request must be {request_id?, action: {type: run|read|telemetry|brick_name|set_brick_name|restart, ...}}"
        })),
    }
}

fn execute(handle: &LinkHandle, action: DriverAction) -> LinkResult<Value> {
    match action {
        DriverAction::Run {
            operations,
            condition,
            timeout_ms,
        } => to_value(&wait(handle.submit(operations, condition), timeout_ms)?),
        DriverAction::Read {
            reply_operations,
            timeout_ms,
        } => to_value(&wait(handle.submit_replies(reply_operations), timeout_ms)?),
        DriverAction::Telemetry => Ok(json!({ "telemetry": handle.latest_telemetry() })),
        DriverAction::BrickName => Ok(json!({ "name": handle.read_brick_name()? })),
        DriverAction::SetBrickName { name } => {
            handle.write_brick_name(&name)?.wait()?;
            Ok(json!({ "name": handle.read_brick_name()? }))
        }
        DriverAction::Restart => {
            handle.restart_session()?;
            Ok(json!({ "connected": handle.is_connected() }))
        }
    }
}

fn wait(ticket: Ticket, timeout_ms: Option<u64>) -> LinkResult<Fulfillment> {
    match timeout_ms {
        Some(ms) => ticket.wait_timeout(Duration::from_millis(ms)),
        None => ticket.wait(),
    }
}

fn to_value(fulfillment: &Fulfillment) -> LinkResult<Value> {
    serde_json::to_value(fulfillment).map_err(|err| LinkError::io("failed to encode result", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickdrive::{Link, LinkConfig, NoopObserver};
    use brickdrive_fixtures::{SimulatedBrick, SimulatedSession};
    use std::io::Cursor;

    fn start() -> LinkHandle {
        let config = LinkConfig {
            telemetry: false,
            ..LinkConfig::default()
        };
        let session = SimulatedSession::new(SimulatedBrick::new());
        Link::start(Box::new(session), config, Box::new(NoopObserver)).unwrap()
    }

    fn drive(handle: &LinkHandle, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        run_driver(handle, Cursor::new(input.to_string()), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn answers_each_request_in_order() {
        let handle = start();
        let input = concat!(
            r#"{"request_id":1,"action":{"type":"brick_name"}}"#,
            "\n",
            r#"{"request_id":"tone","action":{"type":"run","operations":[{"op":"input_device_clear_all"}]}}"#,
            "\n",
            r#"{"request_id":3,"action":{"type":"read","reply_operations":[{"op":"sound_test"}]}}"#,
            "\n",
        );
        let responses = drive(&handle, input);
        handle.disconnect();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["request_id"], 1);
        assert_eq!(responses[0]["status"], "ok");
        assert_eq!(responses[0]["result"]["name"], "EV3");
        assert_eq!(responses[1]["request_id"], "tone");
        assert_eq!(responses[1]["status"], "ok");
        assert_eq!(responses[2]["status"], "ok");
        assert_eq!(responses[2]["result"]["replies"][0]["type"], "sound_busy");
        assert_eq!(responses[2]["result"]["replies"][0]["value"], false);
    }

    #[test]
    fn invalid_lines_get_a_protocol_error_and_the_loop_continues() {
        let handle = start();
        let input = "not json\n\n{\"request_id\":2,\"action\":{\"type\":\"brick_name\"}}\n";
        let responses = drive(&handle, input);
        handle.disconnect();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["status"], "error");
        assert_eq!(responses[0]["request_id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], "E_PROTOCOL");
        assert!(responses[0].get("result").is_none());
        assert_eq!(responses[1]["status"], "ok");
    }

    #[test]
    fn link_errors_are_reported_per_request() {
        let handle = start();
        let input = r#"{"request_id":7,"action":{"type":"set_brick_name","name":"???"}}"#;
        let responses = drive(&handle, input);
        handle.disconnect();

        assert_eq!(responses[0]["request_id"], 7);
        assert_eq!(responses[0]["error"]["code"], "E_PROTOCOL");
    }

    #[test]
    fn requests_after_disconnect_report_a_closed_session() {
        let handle = start();
        handle.disconnect();
        let responses = drive(
            &handle,
            r#"{"request_id":1,"action":{"type":"read","reply_operations":[{"op":"sound_test"}],"timeout_ms":500}}"#,
        );

        assert_eq!(responses[0]["status"], "error");
        let code = responses[0]["error"]["code"].as_str().unwrap();
        assert!(code == "E_SESSION_CLOSED" || code == "E_NOT_CONNECTED", "{code}");
    }
}
