//! The WebSocket wire envelope (§6.1): incoming frames are a small
//! JSON-RPC-shaped request, outgoing frames are either an ack/error for that
//! request or a raw `Event` (already self-describing via its `type` tag).

use agent_core::ResumeRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AckFrame {
    Ack { id: Option<String>, ok: bool, error: Option<String> },
}

impl AckFrame {
    pub fn ok(id: Option<String>) -> Self {
        AckFrame::Ack { id, ok: true, error: None }
    }

    pub fn err(id: Option<String>, message: impl Into<String>) -> Self {
        AckFrame::Ack { id, ok: false, error: Some(message.into()) }
    }
}

/// Parse a `resume` RPC's `params.decision` into a `ResumeRequest`. Shape:
/// `{"action": "approve" | "reject" | "extend" | "stop" | "elicitation", "reason"?, "data"?}`.
pub fn parse_resume_decision(params: &Value) -> Result<ResumeRequest, String> {
    let decision = params.get("decision").ok_or("missing `decision`")?;
    let action = decision.get("action").and_then(Value::as_str).ok_or("missing `decision.action`")?;
    match action {
        "approve" => Ok(ResumeRequest::Approve),
        "reject" => {
            let reason = decision.get("reason").and_then(Value::as_str).unwrap_or("rejected").to_string();
            Ok(ResumeRequest::Reject { reason })
        }
        "extend" => Ok(ResumeRequest::Extend),
        "stop" => Ok(ResumeRequest::Stop),
        "elicitation" => {
            let data = decision.get("data").cloned().unwrap_or(Value::Null);
            Ok(ResumeRequest::Elicitation { data })
        }
        other => Err(format!("unknown resume action: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve_decision() {
        let params = serde_json::json!({ "session": "s1", "decision": { "action": "approve" } });
        assert!(matches!(parse_resume_decision(&params).unwrap(), ResumeRequest::Approve));
    }

    #[test]
    fn parses_reject_decision_with_reason() {
        let params = serde_json::json!({ "decision": { "action": "reject", "reason": "nope" } });
        match parse_resume_decision(&params).unwrap() {
            ResumeRequest::Reject { reason } => assert_eq!(reason, "nope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_action() {
        let params = serde_json::json!({ "decision": { "action": "bogus" } });
        assert!(parse_resume_decision(&params).is_err());
    }
}
