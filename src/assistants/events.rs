//! Classification and decoding of assistant stream events.
//!
//! Event names are dot-namespaced: `thread.created`, `thread.run.queued`,
//! `thread.run.step.delta`, `thread.message.completed`, `error`. A name that
//! does not fit the vocabulary is [`EventKind::Unknown`] and its data is kept
//! unexamined, so newer servers never break an older client.

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};

use super::{aggregate::MergeMode, messages::Message, run_steps::RunStep, runs::Run, threads::Thread};
use crate::{codec::WireEnum, wire_enum, Error, OpenAiError, Result};

wire_enum! {
    pub enum EventPhase {
        Created,
        Queued,
        InProgress,
        RequiresAction,
        Delta,
        Completed,
        Incomplete,
        Failed,
        Cancelling,
        Cancelled,
        Expired,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Thread(EventPhase),
    Run(EventPhase),
    RunStep(EventPhase),
    Message(EventPhase),
    Error,
    Unknown,
}

impl EventKind {
    /// Classifies an event name.
    pub fn classify(name: &str) -> EventKind {
        if name == "error" {
            return EventKind::Error;
        }

        let Some((object, phase)) = name.rsplit_once('.') else {
            return EventKind::Unknown;
        };
        let Some(phase) = EventPhase::table().lookup(phase) else {
            return EventKind::Unknown;
        };

        use EventPhase::*;
        match (object, phase) {
            ("thread", Created) => EventKind::Thread(phase),
            (
                "thread.run",
                Created | Queued | InProgress | RequiresAction | Completed | Incomplete | Failed | Cancelling
                | Cancelled | Expired,
            ) => EventKind::Run(phase),
            ("thread.run.step", Created | InProgress | Delta | Completed | Failed | Cancelled | Expired) => {
                EventKind::RunStep(phase)
            }
            ("thread.message", Created | InProgress | Delta | Completed | Incomplete) => EventKind::Message(phase),
            _ => EventKind::Unknown,
        }
    }

    pub fn phase(&self) -> Option<EventPhase> {
        match self {
            EventKind::Thread(phase)
            | EventKind::Run(phase)
            | EventKind::RunStep(phase)
            | EventKind::Message(phase) => Some(*phase),
            EventKind::Error | EventKind::Unknown => None,
        }
    }
}

/// One classified frame; `data` is still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event: String,
    pub kind: EventKind,
    pub data: String,
}

/// The decoded payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Thread(Thread),
    Run(Run),
    RunStep(RunStep),
    Message(Message),
    Error(OpenAiError),
    Unknown,
}

pub fn parse(event: impl Into<String>, data: impl Into<String>) -> Envelope {
    let event = event.into();
    Envelope {
        kind: EventKind::classify(&event),
        event,
        data: data.into(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Wrapped { error: OpenAiError },
    Bare(OpenAiError),
}

impl Envelope {
    pub fn phase(&self) -> Option<EventPhase> {
        self.kind.phase()
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self.phase() {
            Some(EventPhase::Delta) => MergeMode::Delta,
            _ => MergeMode::Snapshot,
        }
    }

    /// Decodes `data` into the partial object the event carries.
    ///
    /// Delta payloads (`{"id": .., "delta": {..}}`) are lifted into the same
    /// partial type as snapshots.
    pub fn decode(&self) -> Result<Payload> {
        let payload = match self.kind {
            EventKind::Thread(_) => self.decode_as().map(Payload::Thread),
            EventKind::Run(_) => self.decode_as().map(Payload::Run),
            EventKind::RunStep(_) => self.decode_partial().map(Payload::RunStep),
            EventKind::Message(_) => self.decode_partial().map(Payload::Message),
            EventKind::Error => self.decode_as().map(|payload| {
                Payload::Error(match payload {
                    ErrorPayload::Wrapped { error } | ErrorPayload::Bare(error) => error,
                })
            }),
            EventKind::Unknown => return Ok(Payload::Unknown),
        };

        payload.map_err(|source| Error::Decode {
            event: self.event.clone(),
            source,
        })
    }

    fn decode_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }

    fn decode_partial<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.merge_mode() == MergeMode::Snapshot {
            return self.decode_as();
        }

        let mut outer: Map<String, Value> = serde_json::from_str(&self.data)?;
        let mut delta = match outer.remove("delta") {
            Some(Value::Object(delta)) => delta,
            _ => Map::new(),
        };
        if let Some(id) = outer.remove("id") {
            delta.insert("id".to_owned(), id);
        }
        serde_json::from_value(Value::Object(delta))
    }
}
