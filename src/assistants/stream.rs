//! Drives one streamed run.
//!
//! [`RunStream::run`] reads frames one at a time and, for each, decodes the
//! payload, merges it into the session's aggregates and hands the result to
//! the [`StreamObserver`] before the next frame is read. The observer sees
//! updates in exactly the order the server sent them, and a slow observer
//! slows the read loop down.

use std::fmt::Display;

use eventsource_stream::Eventsource;
use futures_util::{stream, Stream, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    aggregate::{Aggregates, ProtocolViolation},
    events::{self, Envelope, EventKind, EventPhase, Payload},
    messages::Message,
    run_steps::RunStep,
    runs::Run,
    threads::Thread,
};
use crate::{client::api_error, Error, OpenAiError, Result};

/// A raw server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        SseFrame {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// One update delivered to a [`StreamObserver`].
///
/// Aggregates are borrowed as they stand right after the merge; clone what
/// must outlive the callback.
#[derive(Debug, Clone, Copy)]
pub enum StreamEvent<'a> {
    Thread(&'a Thread),
    Run { phase: EventPhase, run: &'a Run },
    RunStep { phase: EventPhase, step: &'a RunStep },
    Message { phase: EventPhase, message: &'a Message },
    /// An `error` event. The stream goes on.
    Error(&'a OpenAiError),
    /// A partial that could not be merged. It was dropped and the stream goes on.
    ProtocolViolation(&'a ProtocolViolation),
    /// An event this client does not know.
    Unknown(&'a Envelope),
}

/// Receives every update of a streamed run, synchronously and in order.
///
/// Returning an error stops the stream; the run then fails with
/// [`Error::Observer`].
pub trait StreamObserver {
    fn on_event(&mut self, event: StreamEvent<'_>) -> anyhow::Result<()>;
}

impl<F> StreamObserver for F
where
    F: FnMut(StreamEvent<'_>) -> anyhow::Result<()>,
{
    fn on_event(&mut self, event: StreamEvent<'_>) -> anyhow::Result<()> {
        self(event)
    }
}

/// Pins a closure to the observer signature so its argument and return
/// types can be inferred.
///
/// ```
/// use openai_assistants::assistants::stream::{observe, StreamEvent};
///
/// let mut texts = Vec::new();
/// let _observer = observe(|event| {
///     if let StreamEvent::Message { message, .. } = event {
///         texts.push(message.text());
///     }
///     Ok(())
/// });
/// ```
pub fn observe<F>(observer: F) -> F
where
    F: FnMut(StreamEvent<'_>) -> anyhow::Result<()>,
{
    observer
}

/// One streaming session. Each session owns its own aggregates, so
/// concurrent runs never share state.
#[derive(Debug, Default)]
pub struct RunStream {
    cancel: CancellationToken,
    aggregates: Aggregates,
    strict: bool,
}

impl RunStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops reading as soon as `cancel` fires, returning the run as it
    /// stands at that point.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        RunStream {
            cancel,
            aggregates: Aggregates::new(),
            strict: false,
        }
    }

    /// Ends the session with [`Error::Protocol`] on the first partial that
    /// does not fit the in-flight aggregate. The observer still sees the
    /// violation first.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Consumes `frames` until they end, fail or the session is cancelled,
    /// and returns the last known run.
    ///
    /// The frame source is dropped, closing the transport, before this
    /// returns.
    pub async fn run<S, O>(mut self, frames: S, mut observer: O) -> Result<Run>
    where
        S: Stream<Item = Result<SseFrame>>,
        O: StreamObserver,
    {
        let mut frames = std::pin::pin!(frames);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("run stream cancelled");
                    return self.aggregates.into_run().ok_or(Error::Cancelled);
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => self.handle(frame, &mut observer)?,
                Some(Err(error)) => {
                    return match self.aggregates.into_run() {
                        Some(run) => {
                            warn!(run_id = %run.id, %error, "run stream closed early");
                            Ok(run)
                        }
                        None => Err(error),
                    };
                }
                None => {
                    debug!("run stream ended");
                    return self.aggregates.into_run().ok_or(Error::NoRunObserved);
                }
            }
        }
    }

    fn handle<O: StreamObserver>(&mut self, frame: SseFrame, observer: &mut O) -> Result<()> {
        trace!(event = %frame.event, data = %frame.data, "run stream frame");

        let envelope = events::parse(frame.event, frame.data);
        let mode = envelope.merge_mode();
        let payload = envelope.decode()?;

        match (envelope.kind, payload) {
            (_, Payload::Thread(thread)) => dispatch(observer, StreamEvent::Thread(&thread)),
            (EventKind::Run(phase), Payload::Run(run)) => match self.aggregates.merge_run(run, mode) {
                Ok(merged) => dispatch(observer, StreamEvent::Run { phase, run: merged.aggregate }),
                Err(violation) => report(observer, violation, self.strict),
            },
            (EventKind::RunStep(phase), Payload::RunStep(step)) => {
                match self.aggregates.merge_run_step(step, mode) {
                    Ok(merged) => dispatch(observer, StreamEvent::RunStep { phase, step: merged.aggregate })?,
                    Err(violation) => return report(observer, violation, self.strict),
                }
                if matches!(
                    phase,
                    EventPhase::Completed | EventPhase::Failed | EventPhase::Cancelled | EventPhase::Expired
                ) {
                    self.aggregates.release_run_step();
                }
                Ok(())
            }
            (EventKind::Message(phase), Payload::Message(message)) => {
                match self.aggregates.merge_message(message, mode) {
                    Ok(merged) => dispatch(observer, StreamEvent::Message { phase, message: merged.aggregate })?,
                    Err(violation) => return report(observer, violation, self.strict),
                }
                if matches!(phase, EventPhase::Completed | EventPhase::Incomplete) {
                    self.aggregates.release_message();
                }
                Ok(())
            }
            (_, Payload::Error(error)) => {
                warn!(%error, "error event in run stream");
                dispatch(observer, StreamEvent::Error(&error))
            }
            _ => dispatch(observer, StreamEvent::Unknown(&envelope)),
        }
    }
}

fn dispatch<O: StreamObserver>(observer: &mut O, event: StreamEvent<'_>) -> Result<()> {
    observer.on_event(event).map_err(Error::Observer)
}

fn report<O: StreamObserver>(observer: &mut O, violation: ProtocolViolation, strict: bool) -> Result<()> {
    warn!(%violation, "dropping partial that does not fit the in-flight aggregate");
    dispatch(observer, StreamEvent::ProtocolViolation(&violation))?;
    if strict {
        return Err(Error::Protocol(violation));
    }
    Ok(())
}

/// Frames of an [`EventSource`]. The source is closed once it ends or fails,
/// so it never reconnects behind the session's back.
pub fn frames_from_event_source(source: EventSource) -> impl Stream<Item = Result<SseFrame>> {
    stream::unfold(Some(source), |source| async move {
        let mut source = source?;
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => {
                    return Some((Ok(SseFrame::new(message.event, message.data)), Some(source)));
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    source.close();
                    return None;
                }
                Some(Err(error)) => {
                    source.close();
                    return Some((Err(stream_error(error).await), None));
                }
            }
        }
    })
}

/// A refused request keeps the error its body carries; anything else is a
/// transport failure.
async fn stream_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            warn!(%status, "run stream refused");
            match response.text().await {
                Ok(body) => api_error(body),
                Err(error) => Error::Http(error),
            }
        }
        error => Error::Transport(error.to_string()),
    }
}

/// Frames of a raw `text/event-stream` body.
pub fn frames_from_bytes<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseFrame>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    bytes.eventsource().map(|event| {
        event
            .map(|event| SseFrame::new(event.event, event.data))
            .map_err(|error| Error::Transport(error.to_string()))
    })
}
