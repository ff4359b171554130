//! The default command set.
//!
//! Each command is built by its own function so that hosts can assemble a
//! registry from a subset, or register a command under another name.
//! [`default_cmds`] returns all of them under their usual names.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::background::BackgroundCmd;
use crate::error::ScriptError;
use crate::script::cmd::{command, wait_fn, Cmd, CmdOutput, CmdUsage, WaitHandle};
use crate::script::engine::check_status;
use crate::state::State;

/// Every default command, keyed by name.
pub fn default_cmds() -> BTreeMap<String, Arc<dyn Cmd>> {
    [
        ("cat", cat()),
        ("cd", cd()),
        ("echo", echo()),
        ("env", env()),
        ("exists", exists()),
        ("help", help()),
        ("mkdir", mkdir()),
        ("rm", rm()),
        ("sleep", sleep()),
        ("stderr", stderr()),
        ("stdout", stdout()),
        ("stop", stop()),
        ("wait", wait()),
    ]
    .into_iter()
    .map(|(name, cmd)| (name.to_owned(), cmd))
    .collect()
}

fn output(stdout: String) -> Result<Option<WaitHandle>, ScriptError> {
    Ok(Some(wait_fn(move |_| CmdOutput::stdout(stdout))))
}

// ── Files ─────────────────────────────────────────────────────────────────────

pub fn cat() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("concatenate files and print to the script's stdout buffer").args("files..."),
        |s, args| {
            if args.is_empty() {
                return Err(ScriptError::Usage);
            }
            let mut out = String::new();
            let mut first_err = None;
            for arg in &args {
                match std::fs::read_to_string(s.path(arg)) {
                    Ok(text) => out.push_str(&text),
                    Err(e) if first_err.is_none() => first_err = Some(ScriptError::from(e)),
                    Err(_) => {}
                }
            }
            // Whatever was read is kept even when a later file fails.
            Ok(Some(wait_fn(move |_| CmdOutput {
                stdout: out,
                stderr: String::new(),
                result: first_err.map_or(Ok(()), Err),
            })))
        },
    )
}

pub fn cd() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("change the working directory").args("dir"),
        |s, args| match args.as_slice() {
            [dir] => s.chdir(dir).map(|()| None),
            _ => Err(ScriptError::Usage),
        },
    )
}

pub fn exists() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("check that files exist")
            .args("[-readonly] [-exec] file...")
            .detail(["-readonly also requires the files to be read-only; -exec requires them to be executable."]),
        |s, args| {
            let mut readonly = false;
            let mut exec = false;
            let mut files = args.as_slice();
            while let Some((first, rest)) = files.split_first() {
                match first.as_str() {
                    "-readonly" => readonly = true,
                    "-exec" => exec = true,
                    _ => break,
                }
                files = rest;
            }
            if files.is_empty() {
                return Err(ScriptError::Usage);
            }

            for file in files {
                let path = s.path(file);
                let meta = std::fs::metadata(&path)?;
                if readonly && !meta.permissions().readonly() {
                    return Err(ScriptError::msg(format!("{} exists but is writable", path.display())));
                }
                if exec && !is_executable(&meta) {
                    return Err(ScriptError::msg(format!("{} exists but is not executable", path.display())));
                }
            }
            Ok(None)
        },
    )
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

pub fn mkdir() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("create directories, if they do not already exist")
            .args("path...")
            .detail(["Unlike Unix mkdir, parent directories are always created if needed."]),
        |s, args| {
            if args.is_empty() {
                return Err(ScriptError::Usage);
            }
            for arg in &args {
                std::fs::create_dir_all(s.path(arg))?;
            }
            Ok(None)
        },
    )
}

pub fn rm() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("remove a file or directory")
            .args("path...")
            .detail(["If the path is a directory, its contents are removed recursively."]),
        |s, args| {
            if args.is_empty() {
                return Err(ScriptError::Usage);
            }
            for arg in &args {
                let path = s.path(arg);
                let res = match std::fs::symlink_metadata(&path) {
                    Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
                    Ok(_) => std::fs::remove_file(&path),
                    Err(e) => Err(e),
                };
                match res {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
            Ok(None)
        },
    )
}

// ── Environment ───────────────────────────────────────────────────────────────

pub fn echo() -> Arc<dyn Cmd> {
    command(CmdUsage::new("display a line of text").args("string..."), |_, args| {
        output(format!("{}\n", args.join(" ")))
    })
}

pub fn env() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("set or log the values of environment variables")
            .args("[key[=value]...]")
            .detail([
                "With no arguments, print the script environment to the log.",
                "Otherwise, add the listed key=value pairs to the environment or print the listed keys.",
            ]),
        |s, args| {
            let mut out = String::new();
            if args.is_empty() {
                for kv in s.environ() {
                    out.push_str(&kv);
                    out.push('\n');
                }
                return output(out);
            }
            for arg in &args {
                match arg.split_once('=') {
                    Some((key, value)) => s.setenv(key, value)?,
                    None => {
                        let value = s.lookup_env(arg).unwrap_or("");
                        out.push_str(&format!("{arg}={value}\n"));
                    }
                }
            }
            if out.is_empty() {
                Ok(None)
            } else {
                output(out)
            }
        },
    )
}

// ── Introspection ─────────────────────────────────────────────────────────────

fn help_flags(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        clap::Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(clap::ArgAction::SetTrue)
            .help("print full documentation"),
    )
}

pub fn help() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("log help text for commands and conditions")
            .args("name...")
            .flags(help_flags)
            .detail([
                "To display help for a specific condition, enclose it in brackets: 'help [unix]'.",
                "To display complete documentation when listing all commands, pass the -v flag.",
                "Commands can be filtered with a regexp: 'help ^st'.",
            ]),
        |s, args| {
            let engine = s.engine().cloned().ok_or_else(|| ScriptError::msg("no engine configured"))?;
            let verbose = !args.is_empty() || s.flags().is_some_and(|m| m.get_flag("verbose"));

            let (conds, cmds): (Vec<&str>, Vec<&str>) = args
                .iter()
                .map(String::as_str)
                .partition(|a| a.starts_with('[') && a.ends_with(']'));
            let conds: Vec<&str> = conds.iter().map(|c| &c[1..c.len() - 1]).collect();

            let mut out = Vec::new();
            if !conds.is_empty() || (args.is_empty() && !engine.conds().is_empty()) {
                if args.is_empty() {
                    out.extend_from_slice(b"conditions:\n\n");
                }
                engine.list_conds(&mut out, Some(&*s), &conds)?;
            }
            if !cmds.is_empty() || args.is_empty() {
                if args.is_empty() {
                    out.extend_from_slice(b"\ncommands:\n\n");
                }
                let pattern = cmds.join("|");
                engine.list_cmds(&mut out, verbose, (!pattern.is_empty()).then_some(pattern.as_str()))?;
            }
            output(String::from_utf8_lossy(&out).into_owned())
        },
    )
}

// ── Output matching ───────────────────────────────────────────────────────────

fn match_flags(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        clap::Arg::new("count")
            .short('c')
            .long("count")
            .value_name("int")
            .value_parser(clap::value_parser!(usize))
            .help("exact number of matches expected"),
    )
    .arg(
        clap::Arg::new("quiet")
            .short('q')
            .long("quiet")
            .action(clap::ArgAction::SetTrue)
            .help("do not log the text that failed to match"),
    )
}

/// The pattern is the first argument that is not a flag.
fn first_non_flag(raw_args: &[String]) -> Vec<usize> {
    for (i, arg) in raw_args.iter().enumerate() {
        if arg == "--" {
            return vec![i + 1];
        }
        if !arg.starts_with('-') {
            return vec![i];
        }
    }
    Vec::new()
}

fn match_usage(buffer: &str) -> CmdUsage {
    CmdUsage::new(format!("find lines in the {buffer} buffer that match a pattern"))
        .args("'pattern'")
        .flags(match_flags)
        .regexp_args(first_non_flag)
        .detail([
            "The command succeeds if at least one match (or the exact count, if given) is found.",
            "The -q flag suppresses logging of the text that failed to match.",
        ])
}

pub fn stdout() -> Arc<dyn Cmd> {
    command(match_usage("stdout"), |s, args| match_output(s, &args, "stdout"))
}

pub fn stderr() -> Arc<dyn Cmd> {
    command(match_usage("stderr"), |s, args| match_output(s, &args, "stderr"))
}

fn match_output(s: &mut State, args: &[String], name: &str) -> Result<Option<WaitHandle>, ScriptError> {
    let (count, quiet) = match s.flags() {
        Some(m) => (m.get_one::<usize>("count").copied(), m.get_flag("quiet")),
        None => (None, false),
    };
    let [pattern] = args else { return Err(ScriptError::Usage) };

    let re = Regex::new(&format!("(?m){pattern}"))?;
    let text = (if name == "stdout" { s.stdout() } else { s.stderr() }).to_owned();

    let err = match count {
        Some(want) => {
            let found = re.find_iter(&text).count();
            (found != want).then(|| format!("found {found} matches for `{pattern}` in {name}"))
        }
        None => (!re.is_match(&text)).then(|| format!("no match for `{pattern}` in {name}")),
    };
    match err {
        Some(msg) => {
            if !quiet {
                s.logf(format_args!("[{name}]\n{text}"));
            }
            Err(ScriptError::msg(msg))
        }
        None => Ok(None),
    }
}

// ── Control ───────────────────────────────────────────────────────────────────

pub fn sleep() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("sleep for a specified duration")
            .args("duration")
            .detail(["The duration uses humantime syntax, such as '100ms' or '1m 30s'."])
            .background(),
        |s, args| {
            let [arg] = args.as_slice() else { return Err(ScriptError::Usage) };
            let d: Duration = humantime::parse_duration(arg)
                .map_err(|e| ScriptError::msg(format!("invalid duration {arg:?}: {e}")))?;

            let ctx = s.context().clone();
            let task = tokio::spawn(async move {
                tokio::select! {
                    err = ctx.done() => CmdOutput::failed(err.into()),
                    _ = tokio::time::sleep(d) => CmdOutput::ok(),
                }
            });
            let handle: WaitHandle = Box::new(task);
            Ok(Some(handle))
        },
    )
}

pub fn stop() -> Arc<dyn Cmd> {
    command(
        CmdUsage::new("stop execution of the script")
            .args("[msg]")
            .detail([
                "The message is written to the script log, but no error is reported from the script engine.",
            ]),
        |_, args| match args.as_slice() {
            [] => Err(ScriptError::Stop(None)),
            [msg] => Err(ScriptError::Stop(Some(msg.clone()))),
            _ => Err(ScriptError::Usage),
        },
    )
}

struct WaitCmd {
    usage: CmdUsage,
}

#[async_trait]
impl Cmd for WaitCmd {
    async fn run(&self, state: &mut State, args: Vec<String>) -> Result<Option<WaitHandle>, ScriptError> {
        if !args.is_empty() {
            return Err(ScriptError::Usage);
        }
        wait_background(state).await?;
        Ok(None)
    }

    fn usage(&self) -> &CmdUsage {
        &self.usage
    }
}

pub fn wait() -> Arc<dyn Cmd> {
    Arc::new(WaitCmd {
        usage: CmdUsage::new("wait for completion of background commands").detail([
            "Waits for all background commands to complete.",
            "The output of each command is logged, and concatenated into the stdout and stderr buffers.",
            "If any background command ended in an unexpected state, wait fails.",
        ]),
    })
}

/// Resolve every background command, oldest first.
///
/// Each command's output and error are logged, its outputs are
/// concatenated into the state's stdout and stderr, and its result is
/// checked against the status the command was started with.  The failures
/// are reported together as [`ScriptError::Wait`].
pub async fn wait_background(s: &mut State) -> Result<(), ScriptError> {
    let mut stdouts = String::new();
    let mut stderrs = String::new();
    let mut errs = Vec::new();

    for bg in s.background.drain() {
        s.logf(format_args!("[background] {}\n", bg.describe()));
        let BackgroundCmd { command, wait } = bg;
        let out = wait.wait(s).await;

        s.log_output(&out.stdout, &out.stderr);
        stdouts.push_str(&out.stdout);
        stderrs.push_str(&out.stderr);
        if let Err(e) = &out.result {
            s.logf(format_args!("[{e}]\n"));
        }
        if let Err(e) = check_status(&command, out.result) {
            errs.push(e);
        }
    }

    s.stdout = stdouts;
    s.stderr = stderrs;
    if errs.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::Wait(errs))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
