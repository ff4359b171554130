//! The condition capability contract and constructors for common shapes.

use std::sync::{Arc, OnceLock};

use crate::error::ScriptError;
use crate::state::State;

/// Static description of a condition.
#[derive(Debug, Clone, Default)]
pub struct CondUsage {
    /// When the condition is true, in a single line.
    pub summary: String,
    /// The condition requires a colon-separated suffix, as in `[os:linux]`.
    /// The suffix may be empty (`[prefix:]`).
    pub prefix: bool,
}

/// Decides whether a guarded command should run.
pub trait Cond: Send + Sync {
    /// Whether the condition holds.  `suffix` is always empty for a
    /// non-prefix condition.
    fn eval(&self, state: &State, suffix: &str) -> Result<bool, ScriptError>;

    fn usage(&self) -> &CondUsage;
}

// ── Constructors ──────────────────────────────────────────────────────────────

type EvalFn = dyn Fn(&State, &str) -> Result<bool, ScriptError> + Send + Sync;

struct FuncCond {
    usage: CondUsage,
    eval: Box<EvalFn>,
}

impl Cond for FuncCond {
    fn eval(&self, state: &State, suffix: &str) -> Result<bool, ScriptError> {
        (self.eval)(state, suffix)
    }

    fn usage(&self) -> &CondUsage {
        &self.usage
    }
}

/// A condition with a fixed value.
pub fn bool_cond(summary: impl Into<String>, value: bool) -> Arc<dyn Cond> {
    cond(summary, move |_| Ok(value))
}

/// A plain condition evaluated against the state on every use.
pub fn cond<F>(summary: impl Into<String>, eval: F) -> Arc<dyn Cond>
where
    F: Fn(&State) -> Result<bool, ScriptError> + Send + Sync + 'static,
{
    Arc::new(FuncCond {
        usage: CondUsage { summary: summary.into(), prefix: false },
        eval: Box::new(move |s, _| eval(s)),
    })
}

/// A prefix condition, used as `[name:suffix]`.
pub fn prefix_cond<F>(summary: impl Into<String>, eval: F) -> Arc<dyn Cond>
where
    F: Fn(&State, &str) -> Result<bool, ScriptError> + Send + Sync + 'static,
{
    Arc::new(FuncCond {
        usage: CondUsage { summary: summary.into(), prefix: true },
        eval: Box::new(eval),
    })
}

/// A condition computed on first use and remembered afterwards.
pub fn once_cond<F>(summary: impl Into<String>, eval: F) -> Arc<dyn Cond>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let cell = OnceLock::new();
    cond(summary, move |_| Ok(*cell.get_or_init(&eval)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
