//! Error types for parsing and executing scripts.
//!
//! Every failure surfaced by the engine is a [`ScriptError`].  Errors that
//! originate in a specific command carry their own location in a
//! [`CommandError`]; everything else is prefixed with `file:line:` by the
//! engine via [`ScriptError::At`].

use std::fmt;

use crate::context::ContextError;
use crate::script::parse::quote_args;

// ── ParseError ────────────────────────────────────────────────────────────────

/// A malformed script line.  Always fatal to the script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated quoted argument")]
    UnterminatedQuote,
    #[error("duplicated '!', '?', '*' or '!*' token")]
    DuplicateStatus,
    #[error("empty condition")]
    EmptyCondition,
    #[error("empty command")]
    EmptyCommand,
    #[error("missing command")]
    MissingCommand,
}

// ── CommandError ──────────────────────────────────────────────────────────────

/// An error attributed to a single command invocation.
#[derive(Debug)]
pub struct CommandError {
    pub file: String,
    pub line: usize,
    /// Name of the command.
    pub op: String,
    /// Arguments the command was invoked with (after expansion).
    pub args: Vec<String>,
    pub source: ScriptError,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}:{}: {}: {}", self.file, self.line, self.op, self.source)
        } else {
            write!(
                f,
                "{}:{}: {} {}: {}",
                self.file,
                self.line,
                self.op,
                quote_args(&self.args),
                self.source
            )
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ── ScriptError ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Command(Box<CommandError>),

    /// A non-command error annotated with the line it occurred on.
    #[error("{file}:{line}: {source}")]
    At {
        file: String,
        line: usize,
        source: Box<ScriptError>,
    },

    #[error("unknown command")]
    UnknownCommand,

    #[error("command cannot be run in background")]
    BackgroundUnsupported,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown condition {0:?}")]
    UnknownCondition(String),

    #[error("unknown condition prefix {0:?}")]
    UnknownConditionPrefix(String),

    #[error("condition {0:?} requires a suffix")]
    ConditionNeedsSuffix(String),

    #[error("condition {0:?} cannot be used with a suffix")]
    ConditionSuffixNotAllowed(String),

    #[error("evaluating condition {tag:?}: {source}")]
    Condition {
        tag: String,
        source: Box<ScriptError>,
    },

    #[error("unexpected success")]
    UnexpectedSuccess,

    #[error("invalid usage")]
    Usage,

    /// Raised by the `stop` command; halts the script without failing it.
    #[error("{}", stop_message(.0))]
    Stop(Option<String>),

    /// One or more background commands failed when waited on.
    #[error("{}", join_lines(.0))]
    Wait(Vec<CommandError>),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Flags(#[from] clap::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

fn stop_message(msg: &Option<String>) -> String {
    match msg {
        Some(msg) => format!("stop: {msg}"),
        None => "stop".to_owned(),
    }
}

fn join_lines(errs: &[CommandError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

impl ScriptError {
    /// A plain failure with a message.
    pub fn msg(msg: impl Into<String>) -> Self {
        ScriptError::Failed(msg.into())
    }

    /// The innermost error, looking through location wrappers.
    pub fn root(&self) -> &ScriptError {
        match self {
            ScriptError::Command(c) => c.source.root(),
            ScriptError::At { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.root(), ScriptError::Stop(_))
    }

    pub fn is_wait(&self) -> bool {
        matches!(self.root(), ScriptError::Wait(_))
    }

    /// Whether the error is a cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root(), ScriptError::Context(_))
    }

    /// Whether the error already carries a command location.
    pub fn has_location(&self) -> bool {
        matches!(self, ScriptError::Command(_))
    }
}

impl From<CommandError> for ScriptError {
    fn from(err: CommandError) -> Self {
        ScriptError::Command(Box::new(err))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
