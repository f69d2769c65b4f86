use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize};

/// Maximum program length in characters accepted by the supervisor
pub const MAX_INPUT_SIZE: usize = 10_000;

/// Wall clock budget for one execution in milliseconds
pub const TIMEOUT_MS: u64 = 10_000;

/// Structured outcome of one execution, as produced by the foreign runtime
///
/// Runtimes that fail while marshalling emit partial payloads such as
/// `{"errors": ["..."]}` or `"warnings": null`, so every field tolerates
/// being missing or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Final expression result, if the program produced one
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: String,

    /// Everything the program printed
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: String,

    /// Diagnostics that stopped the program
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,

    /// Diagnostics that did not stop the program
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
}

impl ResultPayload {
    /// Check if the program ran without reporting errors
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A program submitted for execution
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Program source text
    pub code: String,

    /// When the caller submitted the program
    pub submitted_at: SystemTime,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            submitted_at: SystemTime::now(),
        }
    }

    /// Program length in characters (Unicode scalar values, not bytes)
    pub fn char_len(&self) -> usize {
        self.code.chars().count()
    }

    /// Check the program against a maximum length in characters
    #[must_use]
    pub fn fits(&self, max_input_size: usize) -> bool {
        self.char_len() <= max_input_size
    }
}

/// One lifetime of an isolate
///
/// Incremented every time the isolate is torn down and recreated. Messages
/// tagged with a superseded generation are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Identifier of an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
