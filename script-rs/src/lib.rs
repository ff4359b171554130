//! An embeddable, line-oriented script engine for integration tests.
//!
//! A script is a sequence of command lines, grouped into sections by
//! comment lines:
//!
//! ```text
//! # start the server
//! sleep 10ms &
//! echo ready
//! stdout '^ready$'
//!
//! # checks that may take a while
//! * exists $WORKDIR${/}server.pid
//! ! stderr .
//! wait
//! ```
//!
//! Each line names a command from the [`Engine`]'s registry, optionally
//! prefixed by an expected status (`!` fail, `?` either, `*` retry until
//! success, `!*` retry until failure) and by condition guards such as
//! `[unix]` or `[!env:CI]`.  A trailing `&` runs the command in the
//! background until a `wait`.
//!
//! ```
//! use script::{Context, Engine, State};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), script::ScriptError> {
//! let engine = Engine::default();
//! let mut state = State::new(&Context::background(), std::env::temp_dir(), ["NAME=world"])?;
//! let mut log = Vec::new();
//! engine
//!     .execute(&mut state, "hello.txt", "# greet\necho hello $NAME\nstdout 'hello world'\n", &mut log)
//!     .await?;
//! state.close_and_wait(&mut log).await?;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod context;
pub mod error;
pub mod script;
pub mod state;
pub mod var;

pub use config::{ConfigError, EngineConfig};
pub use context::{CancelHandle, Context, ContextError};
pub use error::{CommandError, ParseError, ScriptError};
pub use script::backoff::Backoff;
pub use script::builtins::{default_cmds, wait_background};
pub use script::cmd::{command, wait_fn, Cmd, CmdOutput, CmdUsage, Wait, WaitHandle};
pub use script::cond::{bool_cond, cond, once_cond, prefix_cond, Cond, CondUsage};
pub use script::conditions::default_conds;
pub use script::engine::Engine;
pub use script::parse::{parse_line, quote_args, Command, ExpectedStatus};
pub use state::State;
