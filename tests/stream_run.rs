use either::Either;
use futures_util::{stream, Stream, StreamExt};
use openai_assistants::{
    assistants::{
        aggregate::{ListKind, ProtocolViolation, Slot},
        messages::{AnnotationType, Message},
        runs::{RunStatus, ToolChoiceFunction},
        stream::{frames_from_bytes, RunStream, SseFrame, StreamEvent, StreamObserver},
        Tool,
    },
    Error, OpenAiError, Usage,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Log {
    lines: Vec<String>,
    messages: Vec<Message>,
    violations: Vec<ProtocolViolation>,
    errors: Vec<OpenAiError>,
}

impl Log {
    fn recorder(&mut self) -> Recorder<'_> {
        Recorder { log: self, cancel: None }
    }
}

/// Writes a line per event and keeps copies of what the assertions need.
struct Recorder<'a> {
    log: &'a mut Log,
    cancel: Option<CancellationToken>,
}

impl StreamObserver for Recorder<'_> {
    fn on_event(&mut self, event: StreamEvent<'_>) -> anyhow::Result<()> {
        let line = match event {
            StreamEvent::Thread(thread) => format!("thread {}", thread.id),
            StreamEvent::Run { phase, run } => {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
                format!("run.{phase} {}", run.id)
            }
            StreamEvent::RunStep { phase, step } => format!("step.{phase} {}", step.id),
            StreamEvent::Message { phase, message } => {
                self.log.messages.push(message.clone());
                format!("message.{phase} {}", message.id)
            }
            StreamEvent::Error(error) => {
                self.log.errors.push(error.clone());
                format!("error {}", error.message)
            }
            StreamEvent::ProtocolViolation(violation) => {
                self.log.violations.push(violation.clone());
                "violation".to_owned()
            }
            StreamEvent::Unknown(envelope) => format!("unknown {} {}", envelope.event, envelope.data),
        };
        self.log.lines.push(line);
        Ok(())
    }
}

fn frames(raw: &[(&str, &str)]) -> impl Stream<Item = Result<SseFrame, Error>> {
    let frames: Vec<_> = raw.iter().map(|(event, data)| Ok(SseFrame::new(*event, *data))).collect();
    stream::iter(frames)
}

#[tokio::test]
async fn run_reaches_completion_with_usage() {
    let mut log = Log::default();
    let run = RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","object":"thread.run","status":"queued","model":"gpt-4o"}"#),
                ("thread.run.in_progress", r#"{"id":"run_1","status":"in_progress","started_at":10}"#),
                (
                    "thread.run.completed",
                    r#"{"id":"run_1","status":"completed","completed_at":20,
                        "usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
                ),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert_eq!(run.id, "run_1");
    assert_eq!(run.status, Some(RunStatus::Completed));
    assert_eq!(run.model.as_deref(), Some("gpt-4o"));
    assert_eq!(run.started_at, Some(10));
    assert_eq!(
        run.usage,
        Some(Usage {
            prompt_tokens: 12,
            completion_tokens: 30,
            total_tokens: 42,
        })
    );
    assert_eq!(log.lines, ["run.created run_1", "run.in_progress run_1", "run.completed run_1"]);
}

#[tokio::test]
async fn message_deltas_grow_text_and_overwrite_annotations() {
    let mut log = Log::default();
    RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("thread.message.created", r#"{"id":"msg_1","status":"in_progress","role":"assistant","content":[]}"#),
                (
                    "thread.message.delta",
                    r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[
                        {"index":0,"type":"text","text":{"value":"See ","annotations":[
                            {"index":0,"type":"file_citation","text":"[0]"},
                            {"index":1,"type":"file_citation","text":"[1]"}]}}]}}"#,
                ),
                (
                    "thread.message.delta",
                    r#"{"id":"msg_1","delta":{"content":[
                        {"index":0,"type":"text","text":{"value":"the notes","annotations":[
                            {"index":2,"type":"file_citation","text":"[2]"},
                            {"index":3,"type":"file_path","text":"[3]"}]}}]}}"#,
                ),
                (
                    "thread.message.delta",
                    r#"{"id":"msg_1","delta":{"content":[
                        {"index":0,"type":"text","text":{"annotations":[
                            {"index":2,"type":"file_path","text":"[2b]"}]}}]}}"#,
                ),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    let message = log.messages.last().unwrap();
    assert_eq!(message.text(), "See the notes");

    let annotations = message.content.as_ref().unwrap()[0]
        .text
        .as_ref()
        .unwrap()
        .annotations
        .as_ref()
        .unwrap();
    assert_eq!(annotations.len(), 4);
    assert_eq!(annotations[2].text.as_deref(), Some("[2b]"));
    assert_eq!(annotations[2].kind, Some(AnnotationType::FilePath));
    assert_eq!(annotations[3].text.as_deref(), Some("[3]"));
    assert!(log.violations.is_empty());
}

#[tokio::test]
async fn foreign_run_is_reported_and_dropped() {
    let mut log = Log::default();
    let run = RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("thread.run.created", r#"{"id":"run_2","status":"failed"}"#),
                ("thread.run.in_progress", r#"{"id":"run_1","status":"in_progress"}"#),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert_eq!(run.id, "run_1");
    assert_eq!(run.status, Some(RunStatus::InProgress));
    assert_eq!(
        log.violations,
        [ProtocolViolation::IdMismatch {
            slot: Slot::Run,
            expected: "run_1".to_owned(),
            found: "run_2".to_owned(),
        }]
    );
    assert_eq!(log.lines, ["run.created run_1", "violation", "run.in_progress run_1"]);
}

#[tokio::test]
async fn content_gap_leaves_message_untouched() {
    let mut log = Log::default();
    RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("thread.message.created", r#"{"id":"msg_1","content":[]}"#),
                ("thread.message.delta", r#"{"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hi"}}]}}"#),
                ("thread.message.delta", r#"{"id":"msg_1","delta":{"content":[{"index":3,"type":"text","text":{"value":"!"}}]}}"#),
                ("thread.message.completed", r#"{"id":"msg_1","status":"completed"}"#),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert!(matches!(
        log.violations[..],
        [ProtocolViolation::IndexGap {
            list: ListKind::Content,
            index: 3,
            len: 1,
        }]
    ));
    let message = log.messages.last().unwrap();
    assert_eq!(message.text(), "Hi");
    assert_eq!(message.content.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn events_are_dispatched_in_arrival_order() {
    let mut log = Log::default();
    RunStream::new()
        .run(
            frames(&[
                ("thread.created", r#"{"id":"thread_1","object":"thread"}"#),
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("thread.run.step.created", r#"{"id":"step_1","type":"message_creation","status":"in_progress"}"#),
                ("thread.message.created", r#"{"id":"msg_1","content":[]}"#),
                ("thread.message.delta", r#"{"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"ok"}}]}}"#),
                ("thread.message.completed", r#"{"id":"msg_1","status":"completed"}"#),
                ("thread.run.step.completed", r#"{"id":"step_1","status":"completed"}"#),
                ("thread.run.completed", r#"{"id":"run_1","status":"completed"}"#),
                ("done", "[DONE]"),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert_eq!(
        log.lines,
        [
            "thread thread_1",
            "run.created run_1",
            "step.created step_1",
            "message.created msg_1",
            "message.delta msg_1",
            "message.completed msg_1",
            "step.completed step_1",
            "run.completed run_1",
            "unknown done [DONE]",
        ]
    );
}

#[tokio::test]
async fn released_slots_accept_the_next_step_and_message() {
    let mut log = Log::default();
    RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("thread.run.step.created", r#"{"id":"step_1","status":"in_progress"}"#),
                ("thread.run.step.completed", r#"{"id":"step_1","status":"completed"}"#),
                ("thread.run.step.created", r#"{"id":"step_2","status":"in_progress"}"#),
                ("thread.message.created", r#"{"id":"msg_1","content":[]}"#),
                ("thread.message.delta", r#"{"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"first"}}]}}"#),
                ("thread.message.completed", r#"{"id":"msg_1","status":"completed"}"#),
                ("thread.message.created", r#"{"id":"msg_2","content":[]}"#),
                ("thread.message.delta", r#"{"id":"msg_2","delta":{"content":[{"index":0,"type":"text","text":{"value":"second"}}]}}"#),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert!(log.violations.is_empty());
    let texts: Vec<_> = log.messages.iter().map(|message| (message.id.as_str(), message.text())).collect();
    assert_eq!(texts.last().unwrap(), &("msg_2", "second".to_owned()));
    assert!(texts.contains(&("msg_1", "first".to_owned())));
}

#[tokio::test]
async fn error_event_does_not_end_the_stream() {
    let mut log = Log::default();
    let run = RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                ("error", r#"{"error":{"message":"Rate limit reached","type":"rate_limit_error"}}"#),
                ("thread.run.completed", r#"{"id":"run_1","status":"completed"}"#),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert_eq!(run.status, Some(RunStatus::Completed));
    assert_eq!(log.errors.len(), 1);
    assert_eq!(log.errors[0].error_type, "rate_limit_error");
    assert_eq!(log.lines[1], "error Rate limit reached");
}

#[tokio::test]
async fn unrecognized_tool_types_do_not_end_the_stream() {
    let mut log = Log::default();
    let run = RunStream::new()
        .run(
            frames(&[
                ("thread.run.created", r#"{"id":"run_1","status":"queued"}"#),
                (
                    "thread.run.in_progress",
                    r#"{"id":"run_1","status":"in_progress",
                        "tools":[{"type":"web_search"},{"type":"code_interpreter"}],
                        "tool_choice":{"type":"web_search"}}"#,
                ),
                ("thread.run.completed", r#"{"id":"run_1","status":"completed"}"#),
            ]),
            log.recorder(),
        )
        .await
        .unwrap();

    assert_eq!(run.status, Some(RunStatus::Completed));
    let tools = run.tools.unwrap();
    assert!(matches!(&tools[0], Tool::Other(body) if body["type"] == "web_search"));
    assert_eq!(tools[1], Tool::CodeInterpreter);
    assert!(matches!(run.tool_choice, Some(Either::Right(ToolChoiceFunction::Other(_)))));
    assert!(log.violations.is_empty());
    assert_eq!(log.lines, ["run.created run_1", "run.in_progress run_1", "run.completed run_1"]);
}

#[tokio::test]
async fn transport_failure_after_a_run_returns_it() {
    let mut log = Log::default();
    let frames = stream::iter([
        Ok(SseFrame::new("thread.run.created", r#"{"id":"run_1","status":"queued"}"#)),
        Err(Error::Transport("connection reset".to_owned())),
        Ok(SseFrame::new("thread.run.completed", r#"{"id":"run_1","status":"completed"}"#)),
    ]);

    let run = RunStream::new().run(frames, log.recorder()).await.unwrap();
    assert_eq!(run.status, Some(RunStatus::Queued));
    assert_eq!(log.lines, ["run.created run_1"]);
}

#[tokio::test]
async fn transport_failure_before_a_run_is_an_error() {
    let mut log = Log::default();
    let frames = stream::iter([Err(Error::Transport("connection refused".to_owned()))]);

    let result = RunStream::new().run(frames, log.recorder()).await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn stream_without_run_is_an_error() {
    let mut log = Log::default();
    let result = RunStream::new()
        .run(
            frames(&[("thread.created", r#"{"id":"thread_1"}"#), ("done", "[DONE]")]),
            log.recorder(),
        )
        .await;

    assert!(matches!(result, Err(Error::NoRunObserved)));
    assert_eq!(log.lines, ["thread thread_1", "unknown done [DONE]"]);
}

#[tokio::test]
async fn cancelled_session_reads_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut log = Log::default();
    let result = RunStream::with_cancellation(cancel)
        .run(
            frames(&[("thread.run.created", r#"{"id":"run_1","status":"queued"}"#)]),
            log.recorder(),
        )
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(log.lines.is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_read() {
    let cancel = CancellationToken::new();
    let frames = frames(&[("thread.run.created", r#"{"id":"run_1","status":"queued"}"#)]).chain(stream::pending());

    let mut log = Log::default();
    let mut recorder = log.recorder();
    recorder.cancel = Some(cancel.clone());

    let run = RunStream::with_cancellation(cancel).run(frames, recorder).await.unwrap();
    assert_eq!(run.id, "run_1");
    assert_eq!(log.lines, ["run.created run_1"]);
}

#[tokio::test]
async fn raw_event_stream_drives_a_session() {
    let body = concat!(
        "event: thread.run.created\n",
        "data: {\"id\":\"run_1\",\"status\":\"queued\"}\n\n",
        "event: thread.message.created\n",
        "data: {\"id\":\"msg_1\",\"content\":[]}\n\n",
        "event: thread.message.delta\n",
        "data: {\"id\":\"msg_1\",\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"Hello\"}}]}}\n\n",
        "event: thread.message.delta\n",
        "data: {\"id\":\"msg_1\",\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\", world\"}}]}}\n\n",
        "event: thread.run.completed\n",
        "data: {\"id\":\"run_1\",\"status\":\"completed\"}\n\n",
        "event: done\n",
        "data: [DONE]\n\n",
    );
    // Chunks end mid-line.
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = body.as_bytes().chunks(7).map(|chunk| Ok(chunk.to_vec())).collect();

    let mut log = Log::default();
    let run = RunStream::new()
        .run(frames_from_bytes(stream::iter(chunks)), log.recorder())
        .await
        .unwrap();

    assert_eq!(run.status, Some(RunStatus::Completed));
    assert_eq!(log.messages.last().unwrap().text(), "Hello, world");
    assert_eq!(log.lines.last().unwrap(), "unknown done [DONE]");
}
