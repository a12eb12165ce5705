use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    aggregate::{
        append_text, apply_indexed, check_nested, merge_present, Aggregate, ListKind, MergeMode, ProtocolViolation,
        Slot,
    },
    runs::LastError,
};
use crate::{client::OpenAiClient, wire_enum, ApiResponseOrError, Usage};

/// A step in the execution of a run.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RunStep {
    pub id: String,
    pub object: Option<String>,
    pub created_at: Option<u64>,
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    #[serde(rename = "type")]
    pub step_type: Option<RunStepType>,
    pub status: Option<RunStepStatus>,
    pub step_details: Option<StepDetails>,
    pub last_error: Option<LastError>,
    pub expired_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub metadata: Option<HashMap<String, String>>,
    /// Present once the step has completed.
    pub usage: Option<Usage>,
}

wire_enum! {
    pub enum RunStepType {
        MessageCreation,
        ToolCalls,
    }
}

wire_enum! {
    pub enum RunStepStatus {
        InProgress,
        Cancelled,
        Failed,
        Completed,
        Expired,
    }
}

impl RunStepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStepStatus::InProgress)
    }
}

/// What the step did: `message_creation` or `tool_calls`, matching `type`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StepDetails {
    #[serde(rename = "type")]
    pub kind: Option<RunStepType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_creation: Option<MessageCreation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<RunStepToolCall>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MessageCreation {
    pub message_id: String,
}

wire_enum! {
    pub enum ToolCallType {
        Function,
        CodeInterpreter,
        FileSearch,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RunStepToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ToolCallType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<CodeInterpreterCall>,
    /// Search results are passed through as received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_search: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: Option<String>,
    /// Streamed in pieces; the JSON is only complete once the step is.
    pub arguments: Option<String>,
    /// Set once tool outputs have been submitted.
    pub output: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CodeInterpreterCall {
    pub input: Option<String>,
    pub outputs: Option<Vec<CodeInterpreterOutput>>,
}

wire_enum! {
    pub enum CodeInterpreterOutputType {
        Logs,
        Image,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CodeInterpreterOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(rename = "type")]
    pub kind: Option<CodeInterpreterOutputType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<CodeInterpreterImage>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CodeInterpreterImage {
    pub file_id: String,
}

impl RunStepToolCall {
    fn output_indices(&self) -> Vec<Option<usize>> {
        self.code_interpreter
            .as_ref()
            .and_then(|call| call.outputs.as_ref())
            .map(|outputs| outputs.iter().map(|output| output.index).collect())
            .unwrap_or_default()
    }

    fn output_count(&self) -> usize {
        self.code_interpreter
            .as_ref()
            .and_then(|call| call.outputs.as_ref())
            .map_or(0, Vec::len)
    }

    fn absorb_delta(&mut self, other: RunStepToolCall) {
        merge_present!(self, other; index, id, kind, file_search);

        if let Some(delta) = other.function {
            let function = self.function.get_or_insert_with(FunctionCall::default);
            append_text(&mut function.arguments, delta.arguments);
            merge_present!(function, delta; name, output);
        }

        if let Some(delta) = other.code_interpreter {
            let call = self.code_interpreter.get_or_insert_with(CodeInterpreterCall::default);
            append_text(&mut call.input, delta.input);
            if let Some(incoming) = delta.outputs {
                let outputs = call.outputs.get_or_insert_with(Vec::new);
                apply_indexed(outputs, incoming, |output| output.index, CodeInterpreterOutput::absorb_delta);
            }
        }
    }
}

impl CodeInterpreterOutput {
    fn absorb_delta(&mut self, other: CodeInterpreterOutput) {
        append_text(&mut self.logs, other.logs);
        merge_present!(self, other; index, kind, image);
    }
}

impl StepDetails {
    fn check_delta(&self, other: &StepDetails) -> Result<(), ProtocolViolation> {
        let Some(incoming) = other.tool_calls.as_ref() else {
            return Ok(());
        };
        let nested_lens = self
            .tool_calls
            .iter()
            .flatten()
            .map(RunStepToolCall::output_count)
            .collect();
        check_nested(
            ListKind::ToolCalls,
            ListKind::CodeInterpreterOutputs,
            nested_lens,
            incoming.iter().map(|call| (call.index, call.output_indices())),
        )
    }

    fn absorb(&mut self, other: StepDetails, mode: MergeMode) {
        merge_present!(self, other; kind, message_creation);
        match (mode, other.tool_calls) {
            (_, None) => {}
            (MergeMode::Snapshot, Some(tool_calls)) => self.tool_calls = Some(tool_calls),
            (MergeMode::Delta, Some(incoming)) => {
                let tool_calls = self.tool_calls.get_or_insert_with(Vec::new);
                apply_indexed(tool_calls, incoming, |call| call.index, RunStepToolCall::absorb_delta);
            }
        }
    }
}

impl Aggregate for RunStep {
    const SLOT: Slot = Slot::RunStep;

    fn id(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, mut other: RunStep, mode: MergeMode) -> Result<(), ProtocolViolation> {
        if let (MergeMode::Delta, Some(incoming)) = (mode, other.step_details.as_ref()) {
            match self.step_details.as_ref() {
                Some(current) => current.check_delta(incoming)?,
                None => StepDetails::default().check_delta(incoming)?,
            }
        }

        let step_details = other.step_details.take();
        merge_present!(self, other;
            object, created_at, assistant_id, thread_id, run_id, step_type, status, last_error,
            expired_at, cancelled_at, failed_at, completed_at, metadata, usage,
        );

        if let Some(incoming) = step_details {
            self.step_details.get_or_insert_with(StepDetails::default).absorb(incoming, mode);
        }
        Ok(())
    }
}

impl OpenAiClient {
    pub async fn get_run_step(&self, thread_id: &str, run_id: &str, step_id: &str) -> ApiResponseOrError<RunStep> {
        self.get(format!("threads/{thread_id}/runs/{run_id}/steps/{step_id}"))
            .await
    }

    pub async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> ApiResponseOrError<Vec<RunStep>> {
        self.list(format!("threads/{thread_id}/runs/{run_id}/steps"), None)
            .await
    }
}
