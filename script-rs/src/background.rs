//! Registry of commands started with a trailing `&`.
//!
//! Each entry keeps the parsed [`Command`] (for logging and for checking its
//! expected status once it finishes) together with its completion handle.
//! Entries are only removed when drained by a wait; nothing is reaped
//! implicitly.

use crate::script::cmd::WaitHandle;
use crate::script::parse::{quote_args, Command};

/// A detached command and its completion handle.
pub struct BackgroundCmd {
    pub command: Command,
    pub wait: WaitHandle,
}

impl BackgroundCmd {
    /// `name args...`, as shown in the log when the command is waited on.
    pub fn describe(&self) -> String {
        if self.command.args.is_empty() {
            self.command.name.clone()
        } else {
            format!("{} {}", self.command.name, quote_args(&self.command.args))
        }
    }
}

impl std::fmt::Debug for BackgroundCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundCmd").field("command", &self.describe()).finish_non_exhaustive()
    }
}

/// Background commands in the order they were started.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    tasks: Vec<BackgroundCmd>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command, wait: WaitHandle) {
        self.tasks.push(BackgroundCmd { command, wait });
    }

    /// Remove and return every task, oldest first.
    pub fn drain(&mut self) -> Vec<BackgroundCmd> {
        std::mem::take(&mut self.tasks)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
