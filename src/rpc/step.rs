//! Command descriptors and the handler steps they chain.
//!
//! A command is a tag, a state gate, an optional parameter decoder and an
//! ordered list of stateless [`Step`]s. Steps talk to each other only
//! through the [`Invocation`] they are handed, so a suspended chain is
//! plain data: the invocation plus the index of the next step.

use core::fmt;

use super::envelope::Coda;
use super::value::Value;
use crate::app::ports::{StorageError, StorageJob};
use crate::error::CodecError;

// ── State gate ────────────────────────────────────────────────

/// How a descriptor's required mask is compared with the current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskMatch {
    /// Visible when any required flag is set.
    #[default]
    Any,
    /// Visible only when every required flag is set.
    All,
}

impl MaskMatch {
    pub fn admits(self, required: u32, current: u32) -> bool {
        match self {
            Self::Any => required & current != 0,
            Self::All => required & current == required,
        }
    }
}

/// Flags to set and clear once a chain completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateChange {
    pub set: u32,
    pub clear: u32,
}

impl StateChange {
    pub fn apply(self, mask: u32) -> u32 {
        (mask & !self.clear) | self.set
    }
}

// ── Invocation context ────────────────────────────────────────

/// Everything one run of a command chain carries between steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    id: u32,
    parameters: Value,
    /// Scratch map written by the decoder and earlier steps.
    pub stash: Value,
    completion: Option<Result<(), StorageError>>,
    state_change: Option<StateChange>,
}

impl Invocation {
    pub fn new(id: u32, parameters: Value) -> Self {
        Self {
            id,
            parameters,
            stash: Value::map(),
            completion: None,
            state_change: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Result of the storage job the chain last suspended on, if any.
    pub fn completion(&self) -> Option<Result<(), StorageError>> {
        self.completion
    }

    pub(crate) fn complete_with(&mut self, result: Result<(), StorageError>) {
        self.completion = Some(result);
    }

    /// Queue a state-mask change, applied when the chain completes.
    pub fn change_state(&mut self, change: StateChange) {
        self.state_change = Some(change);
    }

    pub fn state_change(&self) -> Option<StateChange> {
        self.state_change
    }
}

// ── Steps ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StepOutcome {
    /// Run the next step now.
    Continue,
    /// Park the chain until `job` has been executed.
    Suspend(StorageJob),
    /// Finish with this coda.
    Complete(Coda),
}

/// One stage of a command chain. Must not hold per-invocation state.
pub trait Step: Send + Sync {
    fn run(&self, invocation: &mut Invocation) -> StepOutcome;
}

impl<F> Step for F
where
    F: Fn(&mut Invocation) -> StepOutcome + Send + Sync,
{
    fn run(&self, invocation: &mut Invocation) -> StepOutcome {
        self(invocation)
    }
}

/// Validates raw parameters, typically copying them into the stash.
pub type DecodeFn = fn(&Value, &mut Invocation) -> Result<(), CodecError>;

// ── Descriptor ────────────────────────────────────────────────

pub struct CommandDescriptor {
    tag: String,
    required: u32,
    matching: MaskMatch,
    schema: Option<Value>,
    decode: Option<DecodeFn>,
    steps: Vec<Box<dyn Step>>,
}

impl CommandDescriptor {
    pub fn new(tag: &str, required: u32) -> Self {
        Self {
            tag: tag.to_owned(),
            required,
            matching: MaskMatch::Any,
            schema: None,
            decode: None,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn match_all(mut self) -> Self {
        self.matching = MaskMatch::All;
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn decode(mut self, decode: DecodeFn) -> Self {
        self.decode = Some(decode);
        self
    }

    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn schema_value(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    pub fn is_visible(&self, mask: u32) -> bool {
        self.matching.admits(self.required, mask)
    }

    pub(crate) fn decode_parameters(&self, invocation: &mut Invocation) -> Result<(), CodecError> {
        match self.decode {
            Some(decode) => {
                let params = invocation.parameters.clone();
                decode(&params, invocation)
            }
            None => Ok(()),
        }
    }

    pub(crate) fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("tag", &self.tag)
            .field("required", &format_args!("0b{:b}", self.required))
            .field("matching", &self.matching)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}
