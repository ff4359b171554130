//! The script language and its interpreter.
//!
//! - [`parse`]: the line grammar, producing a [`parse::Command`] per line
//! - [`expand`]: `$NAME` / `${NAME}` expansion of unquoted argument text
//! - [`cmd`] and [`cond`]: the command and condition contracts
//! - [`engine`]: the execution loop, status checks and section retries
//! - [`backoff`]: retry delays
//! - [`usage`]: listings used by `help` and `-h`
//! - [`builtins`] and [`conditions`]: the default registries

pub mod backoff;
pub mod builtins;
pub mod cmd;
pub mod cond;
pub mod conditions;
pub mod engine;
pub mod expand;
pub mod parse;
pub mod usage;

pub use engine::Engine;
pub use parse::{parse_line, quote_args, Command, ExpectedStatus};
