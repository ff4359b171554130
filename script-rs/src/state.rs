//! Per-script mutable state.
//!
//! A [`State`] is created by the host before [`Engine::execute`] and is
//! owned by exactly one script run.  The engine and the currently active
//! command are the only things that touch it; ownership passes between them
//! serially through `&mut State`.
//!
//! [`Engine::execute`]: crate::Engine::execute

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::background::BackgroundTasks;
use crate::context::{CancelHandle, Context};
use crate::error::ScriptError;
use crate::script::engine::Engine;
use crate::script::expand::expand;
use crate::var::VarStore;

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// The state of one script execution.
pub struct State {
    ctx: Context,
    cancel: CancelHandle,

    workdir: PathBuf,
    pwd: PathBuf,
    env: VarStore,

    /// Log text of the current section, not yet written out.
    log: String,
    pub(crate) stdout: String,
    pub(crate) stderr: String,

    pub(crate) background: BackgroundTasks,

    pub(crate) retry_count: usize,
    pub(crate) retries_requested: bool,

    /// Parsed flags of the command that is currently running.
    pub(crate) flags: Option<clap::ArgMatches>,
    /// The engine executing this state, while it is executing.
    pub(crate) engine: Option<Engine>,
}

impl State {
    /// Create a state rooted at `workdir` with the given `KEY=VALUE`
    /// environment.  `PWD` is always set to the absolute workdir.
    ///
    /// The state gets its own child of `ctx`, cancelled by
    /// [`State::close_and_wait`].
    pub fn new<I, S>(ctx: &Context, workdir: impl AsRef<Path>, env: I) -> Result<Self, ScriptError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let workdir = std::path::absolute(workdir.as_ref())?;
        let (ctx, cancel) = ctx.with_cancel();
        let mut env = VarStore::from_environ(env);
        env.set("PWD", workdir.display().to_string());

        Ok(Self {
            ctx,
            cancel,
            pwd: workdir.clone(),
            workdir,
            env,
            log: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            background: BackgroundTasks::new(),
            retry_count: 0,
            retries_requested: false,
            flags: None,
            engine: None,
        })
    }

    // ── Context ───────────────────────────────────────────────────────────────

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Cancel this state's context.  Running and future waits observe it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    // ── Filesystem ────────────────────────────────────────────────────────────

    /// The directory the state was created in.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The current directory.
    pub fn getwd(&self) -> &Path {
        &self.pwd
    }

    /// Change the current directory.  Relative paths resolve against the
    /// current directory.
    pub fn chdir(&mut self, dir: impl AsRef<Path>) -> Result<(), ScriptError> {
        let dir = self.path(dir);
        if !std::fs::metadata(&dir)?.is_dir() {
            return Err(ScriptError::msg(format!("{}: not a directory", dir.display())));
        }
        self.env.set("PWD", dir.display().to_string());
        self.pwd = dir;
        Ok(())
    }

    /// Resolve `path` against the current directory.
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.pwd.join(path)
        }
    }

    // ── Environment ───────────────────────────────────────────────────────────

    pub fn setenv(&mut self, key: &str, value: impl Into<String>) -> Result<(), ScriptError> {
        if key.is_empty() || key.contains(['=', '\0']) {
            return Err(ScriptError::msg(format!("invalid environment variable name {key:?}")));
        }
        self.env.set(key, value);
        Ok(())
    }

    pub fn lookup_env(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    /// The environment as `KEY=VALUE` strings.  Excludes the synthetic `/`
    /// and `:` bindings.
    pub fn environ(&self) -> Vec<String> {
        self.env.environ()
    }

    /// Expand `$NAME` and `${NAME}` references in `text` against the state's
    /// environment.  Unset names expand to the empty string.
    pub fn expand_env(&self, text: &str, in_regexp: bool) -> String {
        expand(text, in_regexp, |name| self.lookup_var(name))
    }

    fn lookup_var(&self, name: &str) -> Option<String> {
        match name {
            "/" => Some(MAIN_SEPARATOR.to_string()),
            ":" => Some(PATH_LIST_SEPARATOR.to_string()),
            _ => self.env.get(name).map(str::to_owned),
        }
    }

    // ── Output and log ────────────────────────────────────────────────────────

    /// Stdout of the most recent foreground command (or `wait`).
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Append text to the current section's log.
    pub fn log(&mut self, text: &str) {
        self.log.push_str(text);
    }

    pub fn logf(&mut self, args: fmt::Arguments<'_>) {
        use std::fmt::Write as _;
        // Writing into a String cannot fail.
        let _ = self.log.write_fmt(args);
    }

    /// Log captured output, skipping empty streams.
    pub(crate) fn log_output(&mut self, stdout: &str, stderr: &str) {
        if !stdout.is_empty() {
            self.logf(format_args!("[stdout]\n{stdout}"));
        }
        if !stderr.is_empty() {
            self.logf(format_args!("[stderr]\n{stderr}"));
        }
    }

    pub(crate) fn log_is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub(crate) fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Write the pending log to `w` and clear it.
    pub fn flush_log<W: Write + ?Sized>(&mut self, w: &mut W) -> std::io::Result<()> {
        let res = w.write_all(self.log.as_bytes());
        self.log.clear();
        res
    }

    // ── Command bookkeeping ───────────────────────────────────────────────────

    /// Flags parsed for the running command, if its arguments parsed cleanly.
    pub fn flags(&self) -> Option<&clap::ArgMatches> {
        self.flags.as_ref()
    }

    /// How many times the current section has been replayed.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// Whether the running line asked for retries (`*` or `!*`).
    pub fn retries_requested(&self) -> bool {
        self.retries_requested
    }

    /// Number of background commands not yet waited on.
    pub fn background_len(&self) -> usize {
        self.background.len()
    }

    /// The engine currently executing this state, if any.
    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    /// Cancel the context and wait for every background command.
    ///
    /// Returns an error if any of them ended in an unexpected state.  The
    /// pending log is flushed to `log` either way.
    pub async fn close_and_wait<W: Write + ?Sized>(&mut self, log: &mut W) -> Result<(), ScriptError> {
        self.cancel.cancel();
        let waited = crate::script::builtins::wait_background(self).await;
        let flushed = self.flush_log(log);
        waited?;
        flushed?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(&Context::background(), std::env::temp_dir(), Vec::<String>::new())
            .expect("temp dir state")
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("pwd", &self.pwd)
            .field("env", &self.env)
            .field("background", &self.background.len())
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
