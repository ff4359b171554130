//! The script execution loop.
//!
//! A script is a sequence of lines.  Lines starting with `#` open a new
//! section: the section's log is buffered in the [`State`] and written out
//! when the section ends, followed by its elapsed time.  A line marked `*`
//! or `!*` that does not meet its expectation replays the whole section,
//! from its first command, with exponential backoff between attempts.

use std::collections::BTreeMap;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CommandError, ScriptError};
use crate::script::cmd::{flag_parser, rest_args, Cmd};
use crate::script::cond::Cond;
use crate::script::expand::expand_args;
use crate::script::parse::{parse_line, Command, Condition};
use crate::state::State;

/// Location used for lines run through [`Engine::execute_line`].
const STDIN_FILE: &str = "<stdin>";

/// Runs scripts against a fixed set of commands and conditions.
///
/// The registries are immutable once the engine is built; cloning an
/// engine shares them.
#[derive(Clone)]
pub struct Engine {
    cmds: Arc<BTreeMap<String, Arc<dyn Cmd>>>,
    conds: Arc<BTreeMap<String, Arc<dyn Cond>>>,
    config: EngineConfig,
}

impl Default for Engine {
    /// An engine with the default commands and conditions.
    fn default() -> Self {
        Self::new(crate::script::builtins::default_cmds(), crate::script::conditions::default_conds())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cmds", &self.cmds.keys().collect::<Vec<_>>())
            .field("conds", &self.conds.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    pub fn new(cmds: BTreeMap<String, Arc<dyn Cmd>>, conds: BTreeMap<String, Arc<dyn Cond>>) -> Self {
        Self { cmds: Arc::new(cmds), conds: Arc::new(conds), config: EngineConfig::default() }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cmds(&self) -> &BTreeMap<String, Arc<dyn Cmd>> {
        &self.cmds
    }

    pub fn conds(&self) -> &BTreeMap<String, Arc<dyn Cond>> {
        &self.conds
    }

    // ── Execute ───────────────────────────────────────────────────────────────

    /// Run `script` against `state`, writing the log to `log`.
    ///
    /// Errors raised by a command carry the command's location; any other
    /// error is prefixed with `file:line:`.  A `stop` command ends the
    /// script successfully.  Background commands still running when the
    /// script ends are left in the state.
    ///
    /// The pending section log is written out before a panic in a command
    /// is resumed.
    pub async fn execute<W>(&self, state: &mut State, file: &str, script: &str, log: &mut W) -> Result<(), ScriptError>
    where
        W: Write + Send + ?Sized,
    {
        let prev = state.engine.replace(self.clone());
        let mut section = Section::default();
        let mut lineno = 0;

        let res = AssertUnwindSafe(self.run_script(state, file, script, log, &mut section, &mut lineno))
            .catch_unwind()
            .await;

        // Whatever happened, the pending section's log goes out, even when a
        // command panicked.
        let ended = section.end(state, log, false, self.config.quiet);
        state.engine = prev;
        let res = match res {
            Ok(res) => res,
            Err(panic) => {
                warn!(file, line = lineno, "command panicked");
                std::panic::resume_unwind(panic)
            }
        };

        match (res, ended) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(line_err(file, lineno, e.into())),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn run_script<W>(
        &self,
        s: &mut State,
        file: &str,
        script: &str,
        log: &mut W,
        section: &mut Section,
        lineno: &mut usize,
    ) -> Result<(), ScriptError>
    where
        W: Write + Send + ?Sized,
    {
        let at = |lineno: usize, err: ScriptError| line_err(file, lineno, err);
        let mut lines = script.lines();

        loop {
            if let Some(err) = s.context().err() {
                return Err(at(*lineno, err.into()));
            }
            let Some(line) = lines.next() else { break };
            *lineno += 1;

            if line.starts_with('#') {
                section.end(s, log, true, self.config.quiet).map_err(|e| at(*lineno, e.into()))?;
                // The elapsed time is appended to this line when the section ends.
                write!(log, "{line}").map_err(|e| at(*lineno, e.into()))?;
                section.start = Some(Instant::now());
                debug!(file, line = *lineno, "section start: {line}");
                continue;
            }

            let parsed = parse_line(file, *lineno, line);
            if matches!(parsed, Ok(None)) {
                continue;
            }
            s.logf(format_args!("> {line}\n"));
            let Some(mut cmd) = parsed.map_err(|e| at(*lineno, e.into()))? else { continue };

            if !self.conditions_active(s, &cmd.conds).map_err(|e| at(*lineno, e))? {
                s.log("[condition not met]\n");
                continue;
            }

            self.expand_command(s, &mut cmd);
            s.retry_count = 0;
            s.retries_requested = cmd.want.is_retry();

            let res = self.run_command(s, &mut cmd).await;
            section.cmds.push(cmd);

            let Err(err) = res else { continue };

            if s.retries_requested {
                self.retry_section(s, line, log, section).await.map_err(|e| at(*lineno, e))?;
                continue;
            }

            if err.is_stop() {
                // Logged outside the section it appears in.
                section.end(s, log, true, self.config.quiet).map_err(|e| at(*lineno, e.into()))?;
                info!(file, line = *lineno, "script stopped: {}", err.root());
                s.logf(format_args!("{}\n", err.root()));
                return Ok(());
            }

            warn!(file, line = *lineno, "script failed: {err}");
            return Err(at(*lineno, err));
        }

        section.end(s, log, true, self.config.quiet).map_err(|e| at(*lineno, e.into()))
    }

    /// Replay the current section until its last command meets its
    /// expectation or the state's context is done.
    async fn retry_section<W>(&self, s: &mut State, line: &str, log: &mut W, section: &mut Section) -> Result<(), ScriptError>
    where
        W: Write + Send + ?Sized,
    {
        // Clearing the start keeps the final section end from adding a
        // timestamp to a section that was already written out.
        let retry_start = section.start.take().unwrap_or_else(Instant::now);
        log.write_all(b"\n")?;
        s.flush_log(log)?;

        let ctx = s.context().clone();
        let mut backoff = self.config.backoff();

        loop {
            let delay = backoff.next().unwrap_or(self.config.max_retry_interval);
            writeln!(log, "(command {line:?} failed, retrying in {}...)", humantime::format_duration(delay))?;
            info!(retry = s.retry_count + 1, "retrying section in {delay:?}");

            tokio::select! {
                err = ctx.done() => {
                    s.retry_count = 0;
                    return Err(err.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            s.retry_count += 1;
            let mut failed = false;
            for cmd in section.cmds.iter_mut() {
                if let Err(e) = self.run_command(s, cmd).await {
                    debug!(command = %cmd.name, "replay failed: {e}");
                    failed = true;
                    break;
                }
            }
            s.flush_log(log)?;
            if !failed {
                break;
            }
        }

        writeln!(
            log,
            "(command {line:?} succeeded after {} retries in {:.3}s)",
            s.retry_count,
            retry_start.elapsed().as_secs_f64()
        )?;
        s.retry_count = 0;
        Ok(())
    }

    /// Run a single line, as if typed at a prompt.
    ///
    /// There are no sections and no retries.  The state's log is flushed to
    /// `log` before returning.
    pub async fn execute_line<W>(&self, state: &mut State, line: &str, log: &mut W) -> Result<(), ScriptError>
    where
        W: Write + Send + ?Sized,
    {
        let prev = state.engine.replace(self.clone());
        let res = self.run_line(state, line).await;
        let flushed = state.flush_log(log);
        state.engine = prev;
        res?;
        flushed?;
        Ok(())
    }

    async fn run_line(&self, s: &mut State, line: &str) -> Result<(), ScriptError> {
        let Some(mut cmd) = parse_line(STDIN_FILE, 0, line)? else { return Ok(()) };

        if !self.conditions_active(s, &cmd.conds)? {
            s.log("[condition not met]\n");
            return Ok(());
        }

        self.expand_command(s, &mut cmd);
        match self.run_command(s, &mut cmd).await {
            Err(err) if err.is_stop() => {
                s.logf(format_args!("{}\n", err.root()));
                Ok(())
            }
            res => res,
        }
    }

    // ── Conditions ────────────────────────────────────────────────────────────

    /// Whether every guard holds.  A guard that does not hold is not an
    /// error; an unknown or misused condition is.
    pub fn conditions_active(&self, s: &State, conds: &[Condition]) -> Result<bool, ScriptError> {
        for cond in conds {
            let (imp, suffix) = match cond.tag.split_once(':') {
                Some((prefix, suffix)) => {
                    let imp = self
                        .conds
                        .get(prefix)
                        .ok_or_else(|| ScriptError::UnknownConditionPrefix(prefix.to_owned()))?;
                    if !imp.usage().prefix {
                        return Err(ScriptError::ConditionSuffixNotAllowed(prefix.to_owned()));
                    }
                    (imp, suffix)
                }
                None => {
                    let imp = self
                        .conds
                        .get(&cond.tag)
                        .ok_or_else(|| ScriptError::UnknownCondition(cond.tag.clone()))?;
                    if imp.usage().prefix {
                        return Err(ScriptError::ConditionNeedsSuffix(cond.tag.clone()));
                    }
                    (imp, "")
                }
            };

            let active = imp
                .eval(s, suffix)
                .map_err(|e| ScriptError::Condition { tag: cond.tag.clone(), source: Box::new(e) })?;
            if active != cond.want {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn expand_command(&self, s: &State, cmd: &mut Command) {
        let regexp_args = self
            .cmds
            .get(&cmd.name)
            .and_then(|imp| imp.usage().regexp_args)
            .map(|f| f(&cmd.joined_raw_args()))
            .unwrap_or_default();
        cmd.orig_args = expand_args(s, &cmd.raw_args, &regexp_args);
        cmd.args = cmd.orig_args.clone();
    }

    async fn run_command(&self, s: &mut State, cmd: &mut Command) -> Result<(), ScriptError> {
        let Some(imp) = self.cmds.get(&cmd.name).cloned() else {
            return Err(command_error(cmd, ScriptError::UnknownCommand).into());
        };
        let usage = imp.usage();

        if cmd.background && !usage.is_async {
            return Err(command_error(cmd, ScriptError::BackgroundUnsupported).into());
        }

        // Parsed even without declared flags, so that -h works everywhere.
        match flag_parser(&cmd.name, usage).try_get_matches_from(&cmd.orig_args) {
            Ok(matches) => {
                cmd.args = rest_args(&matches);
                s.flags = Some(matches);
            }
            Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
                let mut out = Vec::new();
                let pattern = format!("^{}$", regex::escape(&cmd.name));
                self.list_cmds(&mut out, true, Some(pattern.as_str()))?;
                let out = String::from_utf8_lossy(&out).into_owned();
                s.log_output(&out, "");
                s.stdout = out;
                s.stderr.clear();
                return Ok(());
            }
            Err(e) if usage.flags.is_some() => return Err(command_error(cmd, e.into()).into()),
            // The command parses its own arguments.
            Err(_) => {
                cmd.args = cmd.orig_args.clone();
                s.flags = None;
            }
        }

        debug!(file = %cmd.file, line = cmd.line, command = %cmd.name, background = cmd.background, "dispatching");

        let handle = match imp.run(s, cmd.args.clone()).await {
            Ok(Some(handle)) => handle,
            Ok(None) if usage.is_async => {
                let err = ScriptError::Internal("async command returned no completion handle".into());
                return Err(command_error(cmd, err).into());
            }
            res => {
                if let Some(expected) = check_status(cmd, res.map(drop))? {
                    s.logf(format_args!("[{expected}]\n"));
                }
                return Ok(());
            }
        };

        if cmd.background {
            s.background.push(cmd.clone(), handle);
            // They no longer belong to the last command run.
            s.stdout.clear();
            s.stderr.clear();
            return Ok(());
        }

        let out = handle.wait(s).await;
        s.log_output(&out.stdout, &out.stderr);
        s.stdout = out.stdout;
        s.stderr = out.stderr;
        if let Some(expected) = check_status(cmd, out.result)? {
            s.logf(format_args!("[{expected}]\n"));
        }
        Ok(())
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Reconcile a command's outcome with its expected status.
///
/// An error that was expected is handed back so the caller can log it.
/// Stop and wait errors always propagate, whatever the expectation.
pub(crate) fn check_status(cmd: &Command, result: Result<(), ScriptError>) -> Result<Option<ScriptError>, CommandError> {
    let err = match result {
        Ok(()) if cmd.want.wants_failure() => return Err(command_error(cmd, ScriptError::UnexpectedSuccess)),
        Ok(()) => return Ok(None),
        Err(err) => err,
    };

    if err.is_stop() || err.is_wait() || cmd.want.wants_success() {
        return Err(command_error(cmd, err));
    }
    // A cancelled command's real outcome is unknown, so a negative
    // assertion cannot be trusted.
    if cmd.want.wants_failure() && err.is_cancellation() {
        return Err(command_error(cmd, err));
    }
    Ok(Some(err))
}

pub(crate) fn command_error(cmd: &Command, source: ScriptError) -> CommandError {
    CommandError {
        file: cmd.file.clone(),
        line: cmd.line,
        op: cmd.name.clone(),
        args: cmd.args.clone(),
        source,
    }
}

fn line_err(file: &str, line: usize, err: ScriptError) -> ScriptError {
    if err.has_location() {
        err
    } else {
        ScriptError::At { file: file.to_owned(), line, source: Box::new(err) }
    }
}

// ── Sections ──────────────────────────────────────────────────────────────────

/// The section being executed.
#[derive(Default)]
struct Section {
    /// Set once the section's header has been written.
    start: Option<Instant>,
    /// Commands run so far, replayed in order on retry.
    cmds: Vec<Command>,
}

impl Section {
    /// Write out the section's log.  `ok` says whether every command in it
    /// succeeded; in quiet mode a successful section keeps only its header.
    fn end<W: Write + ?Sized>(&mut self, s: &mut State, log: &mut W, ok: bool, quiet: bool) -> std::io::Result<()> {
        self.cmds.clear();
        match self.start.take() {
            // No header: log from setting up the state, or after a retry.
            None if s.log_is_empty() => Ok(()),
            None => s.flush_log(log),
            // Elapsed time for doing nothing is meaningless.
            Some(_) if s.log_is_empty() => log.write_all(b"\n"),
            Some(start) => {
                writeln!(log, " ({:.3}s)", start.elapsed().as_secs_f64())?;
                if ok && quiet {
                    s.clear_log();
                    Ok(())
                } else {
                    s.flush_log(log)
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
