use std::sync::{Mutex, MutexGuard};

use chat_api::ToolResultPayload;
use log::warn;
use serde_json::Value;

use crate::capabilities::{execute_tool, CapabilityProvider};

/// The single outstanding privileged action awaiting an approver verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub name: String,
    pub args: Value,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolVerdict {
    Approved,
    Denied,
}

/// Outcome of resolving a pending tool call: the payload that resumes the
/// turn, plus an optional transcript marker for an executed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedToolCall {
    pub payload: ToolResultPayload,
    pub marker: Option<String>,
}

/// Holds at most one [`PendingToolCall`]. While one exists the stream is
/// suspended; a second `client_tool_call` arriving in that window is a
/// protocol violation and is rejected, never overwritten.
#[derive(Default)]
pub struct ConsentCoordinator {
    pending: Mutex<Option<PendingToolCall>>,
}

impl ConsentCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pause-requesting tool call. Returns `false` if one is
    /// already pending.
    pub fn try_register(&self, call: PendingToolCall) -> bool {
        let mut pending = self.lock_pending();
        if let Some(existing) = pending.as_ref() {
            warn!(
                "rejecting tool call '{}' while '{}' is still awaiting a verdict",
                call.name, existing.name
            );
            return false;
        }

        *pending = Some(call);
        true
    }

    pub fn pending(&self) -> Option<PendingToolCall> {
        self.lock_pending().clone()
    }

    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Clear a pending call without resolving it (conversation teardown).
    pub fn clear(&self) {
        self.lock_pending().take();
    }

    /// Apply the approver's verdict to the pending call. Approval executes
    /// the capability; any capability failure becomes a textual result so
    /// the turn resumes either way. Returns `None` when nothing is pending.
    pub fn resolve(
        &self,
        verdict: ToolVerdict,
        provider: &dyn CapabilityProvider,
    ) -> Option<ResolvedToolCall> {
        let call = self.lock_pending().take()?;

        let (result, marker) = match verdict {
            ToolVerdict::Approved => match execute_tool(provider, &call.name, &call.args) {
                Ok(result) => (result, Some(action_marker(&call))),
                Err(error) => (format!("Tool '{}' failed: {error}", call.name), None),
            },
            ToolVerdict::Denied => (
                format!("User denied permission to run '{}'.", call.name),
                None,
            ),
        };

        Some(ResolvedToolCall {
            payload: ToolResultPayload {
                name: call.name,
                result,
                tool_call_id: call.tool_call_id,
            },
            marker,
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingToolCall>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn action_marker(call: &PendingToolCall) -> String {
    let target = call
        .args
        .as_object()
        .and_then(|arguments| {
            ["path", "query"]
                .iter()
                .find_map(|key| arguments.get(*key).and_then(Value::as_str))
        })
        .unwrap_or_default();

    if target.is_empty() {
        format!("[ran {}]", call.name)
    } else {
        format!("[ran {} on {}]", call.name, target)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConsentCoordinator, PendingToolCall, ToolVerdict};
    use crate::capabilities::CapabilityProvider;
    use crate::error::CapabilityError;

    struct RecordingProvider {
        calls: std::sync::Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: std::sync::Mutex::new(Vec::new()),
                fail,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls").len()
        }

        fn answer(&self, name: &str) -> Result<String, CapabilityError> {
            self.calls.lock().expect("calls").push(name.to_string());
            if self.fail {
                Err(CapabilityError::EmptyPath)
            } else {
                Ok(format!("{name} ok"))
            }
        }
    }

    impl CapabilityProvider for RecordingProvider {
        fn read_file(&self, _path: &str) -> Result<String, CapabilityError> {
            self.answer("read_file")
        }

        fn search_files(
            &self,
            _query: &str,
            _dir: Option<&str>,
        ) -> Result<Vec<String>, CapabilityError> {
            self.answer("search_files").map(|result| vec![result])
        }

        fn create_file(&self, _path: &str, _content: &str) -> Result<String, CapabilityError> {
            self.answer("create_file")
        }
    }

    fn call(name: &str) -> PendingToolCall {
        PendingToolCall {
            name: name.to_string(),
            args: json!({"path": "notes.txt"}),
            tool_call_id: "tc-1".to_string(),
        }
    }

    #[test]
    fn a_second_pending_call_is_rejected() {
        let coordinator = ConsentCoordinator::new();
        assert!(coordinator.try_register(call("read_file")));
        assert!(!coordinator.try_register(call("create_file")));

        assert_eq!(
            coordinator.pending().map(|pending| pending.name),
            Some("read_file".to_string())
        );
    }

    #[test]
    fn approval_executes_the_capability_and_yields_a_marker() {
        let coordinator = ConsentCoordinator::new();
        let provider = RecordingProvider::new(false);
        coordinator.try_register(call("read_file"));

        let resolved = coordinator
            .resolve(ToolVerdict::Approved, &provider)
            .expect("resolved");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(resolved.payload.result, "read_file ok");
        assert_eq!(resolved.payload.tool_call_id, "tc-1");
        assert_eq!(
            resolved.marker.as_deref(),
            Some("[ran read_file on notes.txt]")
        );
        assert!(!coordinator.has_pending());
    }

    #[test]
    fn denial_skips_execution_and_submits_a_synthetic_failure() {
        let coordinator = ConsentCoordinator::new();
        let provider = RecordingProvider::new(false);
        coordinator.try_register(call("create_file"));

        let resolved = coordinator
            .resolve(ToolVerdict::Denied, &provider)
            .expect("resolved");
        assert_eq!(provider.call_count(), 0);
        assert!(resolved.payload.result.contains("denied"));
        assert!(resolved.marker.is_none());
    }

    #[test]
    fn capability_failure_becomes_a_textual_result() {
        let coordinator = ConsentCoordinator::new();
        let provider = RecordingProvider::new(true);
        coordinator.try_register(call("read_file"));

        let resolved = coordinator
            .resolve(ToolVerdict::Approved, &provider)
            .expect("resolved");
        assert!(resolved.payload.result.contains("failed"));
        assert!(resolved.marker.is_none());
    }

    #[test]
    fn resolving_without_a_pending_call_yields_none() {
        let coordinator = ConsentCoordinator::new();
        let provider = RecordingProvider::new(false);
        assert!(coordinator.resolve(ToolVerdict::Approved, &provider).is_none());
    }
}
