//! The command capability contract.
//!
//! A [`Cmd`] is looked up by name in the engine's command table.  Running it
//! either finishes immediately (`Ok(None)`) or hands back a completion
//! handle ([`WaitHandle`]) that the engine resolves right away, or, for a
//! line ending in `&`, stores in the state's background registry until a
//! `wait`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScriptError;
use crate::state::State;

// ── Usage ─────────────────────────────────────────────────────────────────────

/// Declares extra flags on top of the built-in `-h/--help`.
pub type FlagsFn = fn(clap::Command) -> clap::Command;

/// Given the raw, unexpanded arguments, returns the indices of the ones that
/// are regular expressions.
pub type RegexpArgsFn = fn(&[String]) -> Vec<usize>;

/// Static description of a command, independent of the name it is
/// registered under.
#[derive(Debug, Clone, Default)]
pub struct CmdUsage {
    /// One line, in the style of a man page NAME section without the name.
    pub summary: String,
    /// Argument synopsis, e.g. `"files..."`.
    pub args: String,
    /// Flag declarations.  When set, flag parse errors fail the command and
    /// the parsed flags are available through [`State::flags`].
    pub flags: Option<FlagsFn>,
    /// Sentences of longer description.
    pub detail: Vec<String>,
    /// The command may run in the background and always returns a handle
    /// or an error.
    pub is_async: bool,
    pub regexp_args: Option<RegexpArgsFn>,
}

impl CmdUsage {
    pub fn new(summary: impl Into<String>) -> Self {
        Self { summary: summary.into(), ..Self::default() }
    }

    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn detail<I, S>(mut self, detail: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detail = detail.into_iter().map(Into::into).collect();
        self
    }

    pub fn flags(mut self, flags: FlagsFn) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn background(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn regexp_args(mut self, f: RegexpArgsFn) -> Self {
        self.regexp_args = Some(f);
        self
    }
}

// ── Completion ────────────────────────────────────────────────────────────────

/// What a completed command produced.
#[derive(Debug)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<(), ScriptError>,
}

impl CmdOutput {
    pub fn ok() -> Self {
        Self { stdout: String::new(), stderr: String::new(), result: Ok(()) }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self { stdout: text.into(), ..Self::ok() }
    }

    pub fn failed(err: ScriptError) -> Self {
        Self { result: Err(err), ..Self::ok() }
    }
}

/// A completion handle.
///
/// Resolving it may read or modify the state, but two handles are never
/// resolved concurrently against the same state.
#[async_trait]
pub trait Wait: Send {
    async fn wait(self: Box<Self>, state: &mut State) -> CmdOutput;
}

pub type WaitHandle = Box<dyn Wait>;

/// A spawned task is a handle; a panic in the task is reported as a failure.
#[async_trait]
impl Wait for tokio::task::JoinHandle<CmdOutput> {
    async fn wait(self: Box<Self>, _state: &mut State) -> CmdOutput {
        match (*self).await {
            Ok(out) => out,
            Err(e) => CmdOutput::failed(ScriptError::msg(format!("background task failed: {e}"))),
        }
    }
}

struct WaitFn<F>(F);

#[async_trait]
impl<F> Wait for WaitFn<F>
where
    F: FnOnce(&mut State) -> CmdOutput + Send,
{
    async fn wait(self: Box<Self>, state: &mut State) -> CmdOutput {
        let WaitFn(f) = *self;
        f(state)
    }
}

/// A handle that runs `f` when resolved.
pub fn wait_fn<F>(f: F) -> WaitHandle
where
    F: FnOnce(&mut State) -> CmdOutput + Send + 'static,
{
    Box::new(WaitFn(f))
}

// ── Cmd ───────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Cmd: Send + Sync {
    /// Begin running the command.
    ///
    /// May inspect and modify `state`.  Commands that produce output or can
    /// run in the background return a handle.
    async fn run(&self, state: &mut State, args: Vec<String>) -> Result<Option<WaitHandle>, ScriptError>;

    fn usage(&self) -> &CmdUsage;
}

type RunFn = dyn Fn(&mut State, Vec<String>) -> Result<Option<WaitHandle>, ScriptError> + Send + Sync;

/// A command backed by a closure.
struct FuncCmd {
    usage: CmdUsage,
    run: Box<RunFn>,
}

#[async_trait]
impl Cmd for FuncCmd {
    async fn run(&self, state: &mut State, args: Vec<String>) -> Result<Option<WaitHandle>, ScriptError> {
        (self.run)(state, args)
    }

    fn usage(&self) -> &CmdUsage {
        &self.usage
    }
}

/// Build a command from its usage and a synchronous run function.
pub fn command<F>(usage: CmdUsage, run: F) -> Arc<dyn Cmd>
where
    F: Fn(&mut State, Vec<String>) -> Result<Option<WaitHandle>, ScriptError> + Send + Sync + 'static,
{
    Arc::new(FuncCmd { usage, run: Box::new(run) })
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Id of the catch-all positional that collects non-flag arguments.
pub(crate) const REST_ARGS: &str = "args";

/// The flag parser for a command: `-h/--help`, the declared flags, and a
/// catch-all positional.
pub(crate) fn flag_parser(name: &str, usage: &CmdUsage) -> clap::Command {
    let parser = clap::Command::new(name.to_owned())
        .no_binary_name(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .arg(
            clap::Arg::new(REST_ARGS)
                .num_args(1..)
                .action(clap::ArgAction::Append)
                .hide(true),
        );
    match usage.flags {
        Some(flags) => flags(parser),
        None => parser,
    }
}

/// The non-flag arguments left after parsing.
pub(crate) fn rest_args(matches: &clap::ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>(REST_ARGS)
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
