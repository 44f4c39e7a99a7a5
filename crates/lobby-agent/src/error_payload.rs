use crate::error::OrchestratorError;

const MAX_MESSAGE_BYTES: usize = 4 * 1024;
const MAX_HINT_BYTES: usize = 1024;

/// Machine-readable error reply for the operator console.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(truncate_utf8(&hint.into(), MAX_HINT_BYTES));
        self
    }

    /// `{"error":{...}}`, one line.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(&serde_json::json!({ "error": self })).unwrap_or_else(|_| {
            "{\"error\":{\"code\":\"internal\",\"message\":\"serialize_failed\"}}".to_string()
        })
    }
}

impl From<&OrchestratorError> for ErrorPayload {
    fn from(err: &OrchestratorError) -> Self {
        let payload = Self::new(err.code(), err.to_string());
        match err.hint() {
            Some(hint) => payload.with_hint(hint),
            None => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use lobby_process::LobbyId;

    use super::*;

    #[test]
    fn long_message_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_MESSAGE_BYTES);
        let p = ErrorPayload::new("test", long);
        assert!(p.message.len() <= MAX_MESSAGE_BYTES);
        assert!(p.message.ends_with("…(truncated)"));
    }

    #[test]
    fn orchestrator_error_keeps_code_and_hint() {
        let err = OrchestratorError::HandshakeTimeout {
            lobby_id: LobbyId(7),
            timeout_ms: 2000,
        };
        let p = ErrorPayload::from(&err);
        assert_eq!(p.code, "handshake_timeout");
        assert!(p.message.contains('7'));
        assert_eq!(p.hint.as_deref(), err.hint());
    }

    #[test]
    fn json_line_wraps_in_error_object() {
        let line = ErrorPayload::new("unknown_command", "nope").to_json_line();
        assert!(!line.contains('\n'));

        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["error"]["code"], "unknown_command");
        assert_eq!(v["error"]["message"], "nope");
        assert!(v["error"].get("hint").is_none());
    }
}
