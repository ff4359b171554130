//! Script line grammar.
//!
//! ```text
//! line    := comment | blank | [status] [cond]* name arg* [ "&" ]
//! status  := "!" | "?" | "*" | "!*"
//! cond    := "[" ["!"] tag "]"
//! comment := "#" text
//! arg     := quoted | bare
//! quoted  := "'" ( any-char | "''" )* "'"
//! ```
//!
//! Arguments are separated by unquoted spaces, tabs, CR or LF; an unquoted
//! `#` ends the line.  Single quotes disable splitting and variable
//! expansion, and a doubled quote inside a quoted region is a literal quote:
//!
//! ```text
//! 'Don''t communicate by sharing memory.'
//! ```

use crate::error::ParseError;

/// Characters that end an unquoted argument.
const ARG_SEP_CHARS: &[u8] = b" \t\r\n#";

// ── Types ─────────────────────────────────────────────────────────────────────

/// The author-declared outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedStatus {
    /// No prefix: the command must succeed.
    #[default]
    Success,
    /// `!`: the command must fail.
    Failure,
    /// `?`: either outcome is fine.
    SuccessOrFailure,
    /// `*`: replay the section until the command succeeds.
    RetryUntilSuccess,
    /// `!*`: replay the section until the command fails.
    RetryUntilFailure,
}

impl ExpectedStatus {
    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "!" => Some(Self::Failure),
            "?" => Some(Self::SuccessOrFailure),
            "*" => Some(Self::RetryUntilSuccess),
            "!*" => Some(Self::RetryUntilFailure),
            _ => None,
        }
    }

    /// The prefix token, or `""` for [`ExpectedStatus::Success`].
    pub fn token(self) -> &'static str {
        match self {
            Self::Success => "",
            Self::Failure => "!",
            Self::SuccessOrFailure => "?",
            Self::RetryUntilSuccess => "*",
            Self::RetryUntilFailure => "!*",
        }
    }

    pub fn wants_success(self) -> bool {
        matches!(self, Self::Success | Self::RetryUntilSuccess)
    }

    pub fn wants_failure(self) -> bool {
        matches!(self, Self::Failure | Self::RetryUntilFailure)
    }

    pub fn is_retry(self) -> bool {
        matches!(self, Self::RetryUntilSuccess | Self::RetryUntilFailure)
    }
}

/// One piece of an argument.  An argument is the concatenation of its
/// fragments, e.g. `a'b c'd` is three fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgFragment {
    pub text: String,
    /// Quoted fragments are never variable-expanded.
    pub quoted: bool,
}

impl ArgFragment {
    fn bare(text: &str) -> Self {
        Self { text: text.to_owned(), quoted: false }
    }

    fn quoted(text: &str) -> Self {
        Self { text: text.to_owned(), quoted: true }
    }
}

/// A `[tag]` or `[!tag]` guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// `false` for `[!tag]`.
    pub want: bool,
    /// `name` or `prefix:suffix`.
    pub tag: String,
}

/// A command parsed from one script line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    pub file: String,
    pub line: usize,
    pub want: ExpectedStatus,
    /// All must hold for the command to run.
    pub conds: Vec<Condition>,
    /// Never empty once parsed.
    pub name: String,
    pub raw_args: Vec<Vec<ArgFragment>>,
    /// Arguments after expansion, before flag extraction.
    pub orig_args: Vec<String>,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Ends with an unquoted `&`.
    pub background: bool,
}

impl Command {
    /// The raw arguments with fragments joined and nothing expanded.
    pub fn joined_raw_args(&self) -> Vec<String> {
        self.raw_args
            .iter()
            .map(|frags| frags.iter().map(|f| f.text.as_str()).collect())
            .collect()
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse one script line.
///
/// Returns `Ok(None)` for a blank or comment-only line.
pub fn parse_line(file: &str, line_no: usize, line: &str) -> Result<Option<Command>, ParseError> {
    let mut cmd = Command { file: file.to_owned(), line: line_no, ..Command::default() };
    let mut want: Option<ExpectedStatus> = None;

    // Fragments of the current argument so far (still missing line[start..i]).
    let mut raw_arg: Vec<ArgFragment> = Vec::new();
    // Start of the pending text chunk, if any.
    let mut start: Option<usize> = None;
    let mut quoted = false;

    let bytes = line.as_bytes();
    let mut i = 0;
    loop {
        if !quoted && (i >= bytes.len() || ARG_SEP_CHARS.contains(&bytes[i])) {
            if let Some(s) = start.take() {
                raw_arg.push(ArgFragment::bare(&line[s..i]));
            }
            flush_arg(&mut cmd, &mut want, std::mem::take(&mut raw_arg))?;
            if i >= bytes.len() || bytes[i] == b'#' {
                break;
            }
            i += 1;
            continue;
        }
        if i >= bytes.len() {
            return Err(ParseError::UnterminatedQuote);
        }
        if bytes[i] == b'\'' {
            if !quoted {
                if let Some(s) = start {
                    raw_arg.push(ArgFragment::bare(&line[s..i]));
                }
                start = Some(i + 1);
                quoted = true;
                i += 1;
                continue;
            }
            let s = start.unwrap_or(i);
            if bytes.get(i + 1) == Some(&b'\'') {
                // 'foo''bar' is foo'bar: keep the first quote, skip the second.
                raw_arg.push(ArgFragment::quoted(&line[s..=i]));
                start = Some(i + 2);
                i += 2;
                continue;
            }
            raw_arg.push(ArgFragment::quoted(&line[s..i]));
            start = None;
            quoted = false;
            i += 1;
            continue;
        }
        if start.is_none() {
            start = Some(i);
        }
        i += 1;
    }

    cmd.want = want.unwrap_or_default();

    if cmd.name.is_empty() {
        if want.is_some() || !cmd.conds.is_empty() || !cmd.raw_args.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        return Ok(None);
    }

    if let Some(last) = cmd.raw_args.last() {
        if matches!(last.as_slice(), [frag] if !frag.quoted && frag.text == "&") {
            cmd.background = true;
            cmd.raw_args.pop();
        }
    }
    Ok(Some(cmd))
}

/// Attach a finished argument to `cmd`: as the status prefix, a condition,
/// the command name, or an ordinary argument.
fn flush_arg(
    cmd: &mut Command,
    want: &mut Option<ExpectedStatus>,
    raw_arg: Vec<ArgFragment>,
) -> Result<(), ParseError> {
    if raw_arg.is_empty() {
        return Ok(());
    }

    if cmd.name.is_empty() {
        if let [frag] = raw_arg.as_slice() {
            if !frag.quoted {
                let tok = frag.text.as_str();

                if let Some(status) = ExpectedStatus::from_token(tok) {
                    if want.is_some() {
                        return Err(ParseError::DuplicateStatus);
                    }
                    *want = Some(status);
                    return Ok(());
                }

                if let Some(inner) = tok.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                    let mut tag = inner.trim();
                    let mut cond_want = true;
                    if let Some(rest) = tag.strip_prefix('!') {
                        cond_want = false;
                        tag = rest.trim();
                    }
                    if tag.is_empty() {
                        return Err(ParseError::EmptyCondition);
                    }
                    cmd.conds.push(Condition { want: cond_want, tag: tag.to_owned() });
                    return Ok(());
                }

                if tok.is_empty() {
                    return Err(ParseError::EmptyCommand);
                }
                cmd.name = tok.to_owned();
                return Ok(());
            }
        }
        // A quoted or partly quoted word cannot name a command.
        return Err(ParseError::MissingCommand);
    }

    cmd.raw_args.push(raw_arg);
    Ok(())
}

// ── Quoting ───────────────────────────────────────────────────────────────────

/// Render `args` so that [`parse_line`] reads them back as the same list.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if i > 0 {
            out.push(' ');
        }
        let needs_quotes = arg.is_empty()
            || arg == "&"
            || arg.bytes().any(|b| b == b'\'' || ARG_SEP_CHARS.contains(&b));
        if needs_quotes {
            out.push('\'');
            out.push_str(&arg.replace('\'', "''"));
            out.push('\'');
        } else {
            out.push_str(arg);
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
