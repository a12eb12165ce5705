//! In-flight aggregates of one streamed run.
//!
//! Each session holds at most one run, one run step and one message. The
//! first partial of a kind becomes the aggregate as-is; later partials are
//! merged into it field by field:
//!
//! * scalars are overwritten only when the partial carries a value,
//! * text in delta partials is appended,
//! * lists in delta partials are merged by `index`: an index inside the list
//!   merges into that element, the index one past the end appends, anything
//!   further is a [`ProtocolViolation::IndexGap`].
//!
//! A partial is validated completely before anything is written, so a
//! rejected partial leaves its aggregate untouched.

use std::fmt;

use thiserror::Error;

use super::{messages::Message, run_steps::RunStep, runs::Run};

/// Overwrites each listed `Option` field of `$target` that `$source` carries.
macro_rules! merge_present {
    ($target:expr, $source:expr; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    };
}

pub(crate) use merge_present;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Run,
    RunStep,
    Message,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::Run => "run",
            Slot::RunStep => "run step",
            Slot::Message => "message",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Content,
    Annotations,
    ToolCalls,
    CodeInterpreterOutputs,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListKind::Content => "content",
            ListKind::Annotations => "annotations",
            ListKind::ToolCalls => "tool_calls",
            ListKind::CodeInterpreterOutputs => "code_interpreter outputs",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("{slot} update for `{found}` arrived while `{expected}` is in flight")]
    IdMismatch {
        slot: Slot,
        expected: String,
        found: String,
    },
    #[error("{list} index {index} skips past the current length {len}")]
    IndexGap {
        list: ListKind,
        index: usize,
        len: usize,
    },
}

/// How a partial relates to its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// A full object: present lists replace, text replaces.
    Snapshot,
    /// An incremental change: text appends, lists merge by index.
    Delta,
}

/// An object that can be accumulated across stream events.
pub trait Aggregate: Sized {
    const SLOT: Slot;

    fn id(&self) -> &str;

    /// Folds `other` into `self`. Must not modify `self` when it fails.
    fn absorb(&mut self, other: Self, mode: MergeMode) -> Result<(), ProtocolViolation>;
}

#[derive(Debug)]
pub struct Merged<'a, T> {
    pub aggregate: &'a T,
    /// Whether this partial opened the slot.
    pub is_first: bool,
}

/// The three slots of one streaming session.
#[derive(Debug, Default)]
pub struct Aggregates {
    run: Option<Run>,
    run_step: Option<RunStep>,
    message: Option<Message>,
}

impl Aggregates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_run(&mut self, partial: Run, mode: MergeMode) -> Result<Merged<'_, Run>, ProtocolViolation> {
        merge_into(&mut self.run, partial, mode)
    }

    pub fn merge_run_step(
        &mut self,
        partial: RunStep,
        mode: MergeMode,
    ) -> Result<Merged<'_, RunStep>, ProtocolViolation> {
        merge_into(&mut self.run_step, partial, mode)
    }

    pub fn merge_message(
        &mut self,
        partial: Message,
        mode: MergeMode,
    ) -> Result<Merged<'_, Message>, ProtocolViolation> {
        merge_into(&mut self.message, partial, mode)
    }

    pub fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    pub fn run_step(&self) -> Option<&RunStep> {
        self.run_step.as_ref()
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Empties the run step slot so the next step starts fresh.
    pub fn release_run_step(&mut self) -> Option<RunStep> {
        self.run_step.take()
    }

    /// Empties the message slot so the next message starts fresh.
    pub fn release_message(&mut self) -> Option<Message> {
        self.message.take()
    }

    pub fn into_run(self) -> Option<Run> {
        self.run
    }
}

fn merge_into<T: Aggregate>(
    slot: &mut Option<T>,
    partial: T,
    mode: MergeMode,
) -> Result<Merged<'_, T>, ProtocolViolation> {
    let (aggregate, is_first) = match slot.take() {
        None => (partial, true),
        Some(mut current) => {
            let merged = if current.id() == partial.id() {
                current.absorb(partial, mode)
            } else {
                Err(ProtocolViolation::IdMismatch {
                    slot: T::SLOT,
                    expected: current.id().to_owned(),
                    found: partial.id().to_owned(),
                })
            };
            if let Err(violation) = merged {
                *slot = Some(current);
                return Err(violation);
            }
            (current, false)
        }
    };

    Ok(Merged {
        aggregate: slot.insert(aggregate),
        is_first,
    })
}

/// Checks the indices of one indexed list against its current length and
/// returns the length after they are applied.
///
/// Items without an index address the position of their offset in the
/// partial.
pub(crate) fn check_indices<I>(list: ListKind, len: usize, indices: I) -> Result<usize, ProtocolViolation>
where
    I: IntoIterator<Item = Option<usize>>,
{
    let mut len = len;
    for (offset, index) in indices.into_iter().enumerate() {
        let index = index.unwrap_or(offset);
        if index > len {
            return Err(ProtocolViolation::IndexGap { list, index, len });
        }
        if index == len {
            len += 1;
        }
    }
    Ok(len)
}

/// Checks a list whose items carry an indexed list of their own.
///
/// `nested_lens` holds the nested length of every current outer item;
/// `incoming` yields the outer index and the nested indices of every item in
/// the partial. Items merged twice in one partial are checked against the
/// length left by the first.
pub(crate) fn check_nested<I>(
    outer: ListKind,
    inner: ListKind,
    mut nested_lens: Vec<usize>,
    incoming: I,
) -> Result<(), ProtocolViolation>
where
    I: IntoIterator<Item = (Option<usize>, Vec<Option<usize>>)>,
{
    for (offset, (index, nested)) in incoming.into_iter().enumerate() {
        let index = index.unwrap_or(offset);
        let len = nested_lens.len();
        match nested_lens.get_mut(index) {
            Some(nested_len) => *nested_len = check_indices(inner, *nested_len, nested)?,
            None if index == len => nested_lens.push(check_indices(inner, 0, nested)?),
            None => return Err(ProtocolViolation::IndexGap { list: outer, index, len }),
        }
    }
    Ok(())
}

/// Applies already checked items: each one merges into the element its
/// index addresses, or into a fresh element appended for it.
pub(crate) fn apply_indexed<T, K, M>(target: &mut Vec<T>, incoming: Vec<T>, index_of: K, mut merge: M)
where
    T: Default,
    K: Fn(&T) -> Option<usize>,
    M: FnMut(&mut T, T),
{
    for (offset, item) in incoming.into_iter().enumerate() {
        let index = index_of(&item).unwrap_or(offset);
        match target.get_mut(index) {
            Some(existing) => merge(existing, item),
            None => {
                let mut fresh = T::default();
                merge(&mut fresh, item);
                target.push(fresh);
            }
        }
    }
}

/// Appends a text delta, starting the text when there was none.
pub(crate) fn append_text(target: &mut Option<String>, suffix: Option<String>) {
    match (target.as_mut(), suffix) {
        (Some(text), Some(suffix)) => text.push_str(&suffix),
        (None, Some(suffix)) => *target = Some(suffix),
        (_, None) => {}
    }
}
