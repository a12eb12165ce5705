use std::{collections::HashMap, time::Duration};

use derive_builder::Builder;
use either::Either;
use reqwest::Method;
use serde::{de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    aggregate::{merge_present, Aggregate, MergeMode, ProtocolViolation, Slot},
    messages::{Attachment, IncompleteDetails, Role},
    stream::{RunStream, StreamObserver},
    Tool, ToolResources, ToolType,
};
use crate::{
    client::OpenAiClient,
    codec::{decode_union, take_payload, TaggedUnion},
    response_format::ResponseFormat,
    wire_enum, ApiResponseOrError, Usage,
};

/// How long [`OpenAiClient::poll_run`] waits between two fetches.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One execution of an assistant on a thread.
///
/// Every field but `id` is optional: a streamed partial only carries what
/// changed, and the timestamps only exist once their phase happened.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Run {
    pub id: String,
    pub object: Option<String>,
    pub created_at: Option<u64>,
    /// The ID of the thread associated with this run.
    pub thread_id: Option<String>,
    /// The ID of the assistant used for this run.
    pub assistant_id: Option<String>,
    pub status: Option<RunStatus>,
    /// Set while the run waits for tool outputs.
    pub required_action: Option<RequiredAction>,
    pub last_error: Option<LastError>,
    pub expires_at: Option<u64>,
    pub started_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub tools: Option<Vec<Tool>>,
    pub metadata: Option<HashMap<String, String>>,
    /// Only present once the run is near completion.
    pub usage: Option<Usage>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_prompt_tokens: Option<u32>,
    pub max_completion_tokens: Option<u32>,
    pub truncation_strategy: Option<TruncationStrategy>,
    #[serde(default, with = "tool_choice")]
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    pub response_format: Option<ResponseFormat>,
}

wire_enum! {
    pub enum RunStatus {
        Queued,
        InProgress,
        RequiresAction,
        Cancelling,
        Cancelled,
        Failed,
        Completed,
        Expired,
        Incomplete,
    }
}

impl RunStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed | RunStatus::Expired | RunStatus::Incomplete
        )
    }

    /// The run is still moving on its own; `requires_action` waits on the caller.
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling)
    }
}

wire_enum! {
    pub enum RequiredActionType {
        Other,
        SubmitToolOutputs,
    }
}

/// What a `requires_action` run waits for.
#[derive(Debug, Clone, PartialEq)]
pub enum RequiredAction {
    SubmitToolOutputs { submit_tool_outputs: SubmitToolOutputs },
    /// An action this client does not know, kept as received.
    Other(Map<String, Value>),
}

impl RequiredAction {
    /// Empty for actions other than `submit_tool_outputs`.
    pub fn tool_calls(&self) -> &[RequiredToolCall] {
        match self {
            RequiredAction::SubmitToolOutputs { submit_tool_outputs } => &submit_tool_outputs.tool_calls,
            RequiredAction::Other(_) => &[],
        }
    }
}

impl TaggedUnion for RequiredAction {
    type Kind = RequiredActionType;

    fn fallback() -> Self {
        RequiredAction::Other(Map::new())
    }

    fn from_parts(kind: RequiredActionType, mut body: Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            RequiredActionType::SubmitToolOutputs => RequiredAction::SubmitToolOutputs {
                submit_tool_outputs: take_payload(&mut body, "submit_tool_outputs")?.unwrap_or_default(),
            },
            RequiredActionType::Other => RequiredAction::Other(body),
        })
    }

    fn kind(&self) -> RequiredActionType {
        match self {
            RequiredAction::SubmitToolOutputs { .. } => RequiredActionType::SubmitToolOutputs,
            RequiredAction::Other(_) => RequiredActionType::Other,
        }
    }
}

impl Serialize for RequiredAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RequiredAction::SubmitToolOutputs { submit_tool_outputs } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", &self.kind())?;
                map.serialize_entry("submit_tool_outputs", submit_tool_outputs)?;
                map.end()
            }
            RequiredAction::Other(body) => body.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RequiredAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        decode_union(Value::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<RequiredToolCall>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RequiredToolCall {
    /// Pass this back in [`ToolOutput::tool_call_id`].
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: RequiredFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RequiredFunction {
    pub name: String,
    /// The arguments the model generated, as JSON. Validate before use.
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LastError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

wire_enum! {
    pub enum TruncationType {
        Auto,
        LastMessages,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TruncationStrategy {
    #[serde(rename = "type")]
    pub kind: TruncationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_messages: Option<u32>,
}

wire_enum! {
    pub enum ToolChoiceMode {
        Auto,
        None,
        Required,
    }
}

/// A specific tool the model must use.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoiceFunction {
    FileSearch,
    CodeInterpreter,
    Function { function: FunctionName },
    /// A tool type this client does not know, kept as received.
    Other(Map<String, Value>),
}

impl TaggedUnion for ToolChoiceFunction {
    type Kind = ToolType;

    fn fallback() -> Self {
        ToolChoiceFunction::Other(Map::new())
    }

    fn from_parts(kind: ToolType, mut body: Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ToolType::FileSearch => ToolChoiceFunction::FileSearch,
            ToolType::CodeInterpreter => ToolChoiceFunction::CodeInterpreter,
            ToolType::Function => ToolChoiceFunction::Function {
                function: take_payload(&mut body, "function")?
                    .ok_or_else(|| <serde_json::Error as de::Error>::missing_field("function"))?,
            },
            ToolType::Other => ToolChoiceFunction::Other(body),
        })
    }

    fn kind(&self) -> ToolType {
        match self {
            ToolChoiceFunction::FileSearch => ToolType::FileSearch,
            ToolChoiceFunction::CodeInterpreter => ToolType::CodeInterpreter,
            ToolChoiceFunction::Function { .. } => ToolType::Function,
            ToolChoiceFunction::Other(_) => ToolType::Other,
        }
    }
}

impl Serialize for ToolChoiceFunction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let ToolChoiceFunction::Other(body) = self {
            return body.serialize(serializer);
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind())?;
        if let ToolChoiceFunction::Function { function } = self {
            map.serialize_entry("function", function)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolChoiceFunction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        decode_union(Value::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FunctionName {
    pub name: String,
}

/// A bare mode string or a specific tool.
pub type ToolChoice = Either<ToolChoiceMode, ToolChoiceFunction>;

/// `Option<ToolChoice>` through `either`'s untagged representation.
mod tool_choice {
    use either::Either;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ToolChoice;

    #[derive(Deserialize)]
    struct Untagged(#[serde(with = "either::serde_untagged")] ToolChoice);

    pub fn serialize<S>(value: &Option<ToolChoice>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(Either::Left(mode)) => mode.serialize(serializer),
            Some(Either::Right(function)) => function.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ToolChoice>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Untagged>::deserialize(deserializer)?.map(|Untagged(choice)| choice))
    }
}

impl Aggregate for Run {
    const SLOT: Slot = Slot::Run;

    fn id(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, mut other: Run, _mode: MergeMode) -> Result<(), ProtocolViolation> {
        if let (Some(current), Some(next)) = (self.status, other.status) {
            if current.is_terminal() && !next.is_terminal() {
                warn!(run_id = %self.id, %current, %next, "ignoring status regression of a finished run");
                other.status = None;
            }
        }

        merge_present!(self, other;
            object, created_at, thread_id, assistant_id, status, required_action, last_error,
            expires_at, started_at, cancelled_at, failed_at, completed_at, incomplete_details,
            model, instructions, tools, metadata, usage, temperature, top_p, max_prompt_tokens,
            max_completion_tokens, truncation_strategy, tool_choice, parallel_tool_calls,
            response_format,
        );
        Ok(())
    }
}

#[derive(Serialize, Builder, Debug, Clone, Default)]
#[builder(pattern = "owned")]
#[builder(name = "CreateThreadRunBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateThreadRunRequest {
    /// ID of the assistant to use.
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub thread: Option<CreateThreadRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none", with = "tool_choice")]
    #[builder(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub truncation_strategy: Option<TruncationStrategy>,
}

#[derive(Serialize, Builder, Debug, Clone, Default)]
#[builder(pattern = "owned")]
#[builder(name = "CreateThreadBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateThreadRequest {
    #[builder(default)]
    pub messages: Vec<CreateThreadMessageRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Serialize, Builder, Debug, Clone)]
#[builder(pattern = "owned")]
#[builder(name = "CreateThreadMessageBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateThreadMessageRequest {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl CreateThreadMessageRequest {
    pub fn user(content: impl Into<String>) -> Self {
        CreateThreadMessageRequest {
            role: Role::User,
            content: content.into(),
            attachments: None,
            metadata: None,
        }
    }
}

#[derive(Serialize, Builder, Debug, Clone, Default)]
#[builder(pattern = "owned")]
#[builder(name = "CreateRunBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub additional_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub additional_messages: Option<Vec<CreateThreadMessageRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none", with = "tool_choice")]
    #[builder(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<ToolOutput>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl OpenAiClient {
    /// Creates a thread and runs it in one request.
    pub async fn create_thread_run(&self, request: CreateThreadRunRequest) -> ApiResponseOrError<Run> {
        self.post("threads/runs", request).await
    }

    pub async fn create_run(&self, thread_id: &str, request: CreateRunRequest) -> ApiResponseOrError<Run> {
        self.post(format!("threads/{thread_id}/runs"), request)
            .await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> ApiResponseOrError<Run> {
        self.get(format!("threads/{thread_id}/runs/{run_id}")).await
    }

    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> ApiResponseOrError<Run> {
        self.request(Method::POST, format!("threads/{thread_id}/runs/{run_id}/cancel"), None::<()>)
            .await
    }

    /// Fetches the run every [`POLL_INTERVAL`] until it stops on its own:
    /// finished, or waiting for tool outputs.
    pub async fn poll_run(&self, thread_id: &str, mut run: Run) -> ApiResponseOrError<Run> {
        while run.status.map_or(true, |status| status.is_pending()) {
            tokio::time::sleep(POLL_INTERVAL).await;
            run = self.get_run(thread_id, &run.id).await?;
            debug!(run_id = %run.id, status = ?run.status, "polled run");
        }
        Ok(run)
    }

    pub async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        request: SubmitToolOutputsRequest,
    ) -> ApiResponseOrError<Run> {
        self.post(format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"), request)
            .await
    }

    pub async fn submit_tool_outputs_and_poll(
        &self,
        thread_id: &str,
        run_id: &str,
        request: SubmitToolOutputsRequest,
    ) -> ApiResponseOrError<Run> {
        let run = self.submit_tool_outputs(thread_id, run_id, request).await?;
        self.poll_run(thread_id, run).await
    }

    /// Starts a run with `stream: true` and drives `session` over its events.
    pub async fn create_run_stream<O>(
        &self,
        thread_id: &str,
        request: CreateRunRequest,
        session: RunStream,
        observer: O,
    ) -> ApiResponseOrError<Run>
    where
        O: StreamObserver,
    {
        let frames = self.stream(format!("threads/{thread_id}/runs"), request)?;
        session.run(frames, observer).await
    }

    pub async fn create_thread_run_stream<O>(
        &self,
        request: CreateThreadRunRequest,
        session: RunStream,
        observer: O,
    ) -> ApiResponseOrError<Run>
    where
        O: StreamObserver,
    {
        let frames = self.stream("threads/runs", request)?;
        session.run(frames, observer).await
    }

    /// Submits tool outputs and streams the rest of the run.
    pub async fn submit_tool_outputs_stream<O>(
        &self,
        thread_id: &str,
        run_id: &str,
        request: SubmitToolOutputsRequest,
        session: RunStream,
        observer: O,
    ) -> ApiResponseOrError<Run>
    where
        O: StreamObserver,
    {
        let frames = self.stream(format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"), request)?;
        session.run(frames, observer).await
    }
}
