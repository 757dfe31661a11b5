//! Error taxonomy for the compilation core.
//!
//! Four classes, with very different handling:
//!
//! - **Policy rejections** (`Skipped`, `Filtered`, `UnsupportedIsa`): no
//!   artifact, the method keeps its existing execution strategy. Silent.
//! - **Structural failures** (`InvalidBytecode`, `ThrowCatchLoop`,
//!   `AmbiguousArrayOp`): this method cannot be compiled; the run continues.
//! - **Configuration errors** (`UnknownPass`, `MissingAnalysis`): the
//!   requested pass list is wrong; the whole run must abort, not one method.
//! - **Invariant violations**: a defect in the compiler itself, carrying
//!   enough context (pass name, instruction id) to be actionable.

use thiserror::Error;

/// Result type used throughout the compilation core.
pub type CompileResult<T> = Result<T, CompileError>;

/// Why a method compilation produced no artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Method exceeds the configured size/complexity thresholds.
    #[error("method skipped by size filter")]
    Skipped,

    /// Method excluded by the driver's filter policy.
    #[error("method excluded by compilation policy")]
    Filtered,

    /// Target instruction set has no backend support.
    #[error("unsupported instruction set")]
    UnsupportedIsa,

    /// Structurally invalid bytecode (bad block boundaries, register
    /// indices, truncated instructions).
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// A loop formed only of throw/catch edges.
    #[error("unsupported throw-catch loop")]
    ThrowCatchLoop,

    /// Array element width cannot be disambiguated across a throw edge.
    #[error("ambiguous array operation")]
    AmbiguousArrayOp,

    /// A requested pass name the factory does not recognize.
    #[error("unknown optimization pass \"{0}\"")]
    UnknownPass(String),

    /// A transform whose required analysis did not precede it in the list.
    #[error("pass \"{pass}\" requires a preceding {analysis} analysis")]
    MissingAnalysis { pass: &'static str, analysis: &'static str },

    /// Graph consistency violated after a pass. Compiler defect.
    #[error("graph invariant violated after pass \"{pass}\": {detail}")]
    InvariantViolation { pass: String, detail: String },
}

impl CompileError {
    /// Policy rejections are expected and silent; everything else is at
    /// least diagnostic-worthy.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            CompileError::Skipped | CompileError::Filtered | CompileError::UnsupportedIsa
        )
    }

    /// Configuration errors abort the whole run, not just one method.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CompileError::UnknownPass(_) | CompileError::MissingAnalysis { .. }
        )
    }
}
