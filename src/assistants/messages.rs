use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    aggregate::{
        append_text, apply_indexed, check_nested, merge_present, Aggregate, ListKind, MergeMode, ProtocolViolation,
        Slot,
    },
    Tool,
};
use crate::{client::OpenAiClient, wire_enum, ApiResponseOrError};

/// A message of a thread. Every field but `id` is optional so that a
/// streamed partial can leave it out.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub object: Option<String>,
    pub created_at: Option<u64>,
    /// The thread ID that this message belongs to.
    pub thread_id: Option<String>,
    pub status: Option<MessageStatus>,
    /// On an incomplete message, details about why the message is incomplete.
    pub incomplete_details: Option<IncompleteDetails>,
    pub completed_at: Option<u64>,
    pub incomplete_at: Option<u64>,
    /// The entity that produced the message.
    pub role: Option<Role>,
    pub content: Option<Vec<MessageContent>>,
    pub assistant_id: Option<String>,
    /// The ID of the run that produced this message, if any.
    pub run_id: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub metadata: Option<HashMap<String, String>>,
}

wire_enum! {
    pub enum MessageStatus {
        InProgress,
        Incomplete,
        Completed,
    }
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::InProgress)
    }
}

wire_enum! {
    pub enum Role {
        User,
        Assistant,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct IncompleteDetails {
    pub reason: IncompleteReason,
}

wire_enum! {
    /// Why a run or a message stopped early.
    pub enum IncompleteReason {
        Other,
        MaxCompletionTokens,
        MaxPromptTokens,
        MaxTokens,
        ContentFilter,
        RunCancelled,
        RunExpired,
        RunFailed,
    }
}

wire_enum! {
    pub enum ContentType {
        Text,
        ImageFile,
        ImageUrl,
        Refusal,
    }
}

/// One content block.
///
/// The payload member named after `type` is set; in a delta, `index` is the
/// block's position in the message.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(rename = "type")]
    pub kind: Option<ContentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Text>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file: Option<ImageFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl MessageContent {
    pub fn text(value: impl Into<String>) -> Self {
        MessageContent {
            kind: Some(ContentType::Text),
            text: Some(Text {
                value: Some(value.into()),
                annotations: None,
            }),
            ..Default::default()
        }
    }

    fn annotation_indices(&self) -> Vec<Option<usize>> {
        self.text
            .as_ref()
            .and_then(|text| text.annotations.as_ref())
            .map(|annotations| annotations.iter().map(|annotation| annotation.index).collect())
            .unwrap_or_default()
    }

    fn absorb_delta(&mut self, other: MessageContent) {
        append_text(&mut self.refusal, other.refusal);
        merge_present!(self, other; index, kind, image_file, image_url);
        if let Some(delta) = other.text {
            self.text.get_or_insert_with(Text::default).absorb_delta(delta);
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Text {
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
}

impl Text {
    fn absorb_delta(&mut self, other: Text) {
        append_text(&mut self.value, other.value);
        if let Some(incoming) = other.annotations {
            let annotations = self.annotations.get_or_insert_with(Vec::new);
            apply_indexed(annotations, incoming, |annotation| annotation.index, Annotation::absorb);
        }
    }
}

wire_enum! {
    pub enum AnnotationType {
        FileCitation,
        FilePath,
    }
}

/// A citation inside a text block.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Annotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(rename = "type")]
    pub kind: Option<AnnotationType>,
    /// The text in the message content that is replaced by this annotation.
    pub text: Option<String>,
    pub start_index: Option<u32>,
    pub end_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_citation: Option<FileReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<FileReference>,
}

impl Annotation {
    fn absorb(&mut self, other: Annotation) {
        merge_present!(self, other; index, kind, text, start_index, end_index, file_citation, file_path);
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileReference {
    pub file_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ImageFile {
    pub file_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Attachment {
    pub file_id: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

impl Message {
    /// The concatenated value of every text block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(|block| block.text.as_ref()?.value.as_deref())
            .collect()
    }
}

impl Aggregate for Message {
    const SLOT: Slot = Slot::Message;

    fn id(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, mut other: Message, mode: MergeMode) -> Result<(), ProtocolViolation> {
        if let (MergeMode::Delta, Some(incoming)) = (mode, other.content.as_ref()) {
            let nested_lens = self
                .content
                .iter()
                .flatten()
                .map(|block| {
                    block
                        .text
                        .as_ref()
                        .and_then(|text| text.annotations.as_ref())
                        .map_or(0, Vec::len)
                })
                .collect();
            check_nested(
                ListKind::Content,
                ListKind::Annotations,
                nested_lens,
                incoming.iter().map(|block| (block.index, block.annotation_indices())),
            )?;
        }

        let content = other.content.take();
        merge_present!(self, other;
            object, created_at, thread_id, status, incomplete_details, completed_at,
            incomplete_at, role, assistant_id, run_id, attachments, metadata,
        );

        match (mode, content) {
            (_, None) => {}
            (MergeMode::Snapshot, Some(content)) => self.content = Some(content),
            (MergeMode::Delta, Some(incoming)) => {
                let blocks = self.content.get_or_insert_with(Vec::new);
                apply_indexed(blocks, incoming, |block| block.index, MessageContent::absorb_delta);
            }
        }
        Ok(())
    }
}

impl OpenAiClient {
    pub async fn list_messages(&self, thread_id: &str, after_id: Option<String>) -> ApiResponseOrError<Vec<Message>> {
        self.list(format!("threads/{thread_id}/messages"), after_id)
            .await
    }

    pub async fn get_message(&self, thread_id: &str, message_id: &str) -> ApiResponseOrError<Message> {
        self.get(format!("threads/{thread_id}/messages/{message_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn streaming_message() -> Message {
        delta(json!({
            "id": "msg_1",
            "object": "thread.message",
            "status": "in_progress",
            "role": "assistant",
            "content": []
        }))
    }

    #[test]
    fn repeated_index_in_a_new_block_folds_into_one_annotation() {
        let mut message = streaming_message();
        let partial = delta(json!({
            "id": "msg_1",
            "content": [{"index": 0, "type": "text", "text": {
                "value": "see [1]",
                "annotations": [
                    {"index": 0, "type": "file_citation", "text": "[1]", "start_index": 4},
                    {"index": 0, "end_index": 7, "file_citation": {"file_id": "file_1"}}
                ]
            }}]
        }));
        message.absorb(partial, MergeMode::Delta).unwrap();

        let content = message.content.as_ref().unwrap();
        let annotations = content[0].text.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].index, Some(0));
        assert_eq!(annotations[0].text.as_deref(), Some("[1]"));
        assert_eq!(annotations[0].start_index, Some(4));
        assert_eq!(annotations[0].end_index, Some(7));
        assert_eq!(annotations[0].file_citation.as_ref().map(|file| file.file_id.as_str()), Some("file_1"));
    }

    #[test]
    fn text_deltas_concatenate() {
        let mut message = streaming_message();
        for piece in ["Hello", " world"] {
            let partial = delta(json!({
                "id": "msg_1",
                "content": [{"index": 0, "type": "text", "text": {"value": piece}}]
            }));
            message.absorb(partial, MergeMode::Delta).unwrap();
        }

        let mut single = streaming_message();
        let partial = delta(json!({
            "id": "msg_1",
            "content": [{"index": 0, "type": "text", "text": {"value": "Hello world"}}]
        }));
        single.absorb(partial, MergeMode::Delta).unwrap();

        assert_eq!(message.text(), "Hello world");
        assert_eq!(message, single);
    }

    #[test]
    fn omitted_scalars_are_kept() {
        let mut message = streaming_message();
        message
            .absorb(delta(json!({"id": "msg_1", "run_id": "run_1"})), MergeMode::Snapshot)
            .unwrap();

        assert_eq!(message.status, Some(MessageStatus::InProgress));
        assert_eq!(message.role, Some(Role::Assistant));
        assert_eq!(message.run_id.as_deref(), Some("run_1"));
    }

    #[test]
    fn annotation_at_existing_index_is_overwritten() {
        let mut message = streaming_message();
        let annotations: Vec<_> = (0..4)
            .map(|index| json!({"index": index, "type": "file_citation", "text": format!("[{index}]")}))
            .collect();
        message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "content": [{"index": 0, "type": "text", "text": {"value": "cited", "annotations": annotations}}]
                })),
                MergeMode::Delta,
            )
            .unwrap();

        message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "content": [{"index": 0, "type": "text", "text": {
                        "annotations": [{"index": 2, "text": "[two]", "file_citation": {"file_id": "file_9"}}]
                    }}]
                })),
                MergeMode::Delta,
            )
            .unwrap();

        let content = message.content.as_ref().unwrap();
        let annotations = content[0].text.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations.len(), 4);
        assert_eq!(annotations[2].text.as_deref(), Some("[two]"));
        assert_eq!(annotations[2].kind, Some(AnnotationType::FileCitation));
        assert_eq!(annotations[2].file_citation.as_ref().unwrap().file_id, "file_9");
        assert_eq!(message.text(), "cited");
    }

    #[test]
    fn annotation_gap_leaves_message_untouched() {
        let mut message = streaming_message();
        message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "content": [{"index": 0, "type": "text", "text": {"value": "Hi"}}]
                })),
                MergeMode::Delta,
            )
            .unwrap();
        let before = message.clone();

        let violation = message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "status": "completed",
                    "content": [{"index": 0, "text": {"value": "!", "annotations": [{"index": 1}]}}]
                })),
                MergeMode::Delta,
            )
            .unwrap_err();

        assert_eq!(
            violation,
            ProtocolViolation::IndexGap {
                list: ListKind::Annotations,
                index: 1,
                len: 0,
            }
        );
        assert_eq!(message, before);
    }

    #[test]
    fn snapshot_replaces_content() {
        let mut message = streaming_message();
        message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "content": [{"index": 0, "type": "text", "text": {"value": "Hel"}}]
                })),
                MergeMode::Delta,
            )
            .unwrap();
        message
            .absorb(
                delta(json!({
                    "id": "msg_1",
                    "status": "completed",
                    "content": [{"type": "text", "text": {"value": "Hello", "annotations": []}}]
                })),
                MergeMode::Snapshot,
            )
            .unwrap();

        assert_eq!(message.text(), "Hello");
        assert_eq!(message.status, Some(MessageStatus::Completed));
    }

    #[test]
    fn incomplete_reason_tolerates_new_values() {
        let details: IncompleteDetails = serde_json::from_value(json!({"reason": "run_failed"})).unwrap();
        assert_eq!(details.reason, IncompleteReason::RunFailed);

        let details: IncompleteDetails = serde_json::from_value(json!({"reason": "solar_flare"})).unwrap();
        assert_eq!(details.reason, IncompleteReason::Other);
    }
}
