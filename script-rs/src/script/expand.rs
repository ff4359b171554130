//! Variable expansion for unquoted argument text.
//!
//! | Sequence   | Meaning                                                    |
//! |------------|------------------------------------------------------------|
//! | `$name`    | Variable `name` (ASCII letters, digits and `_`)            |
//! | `${text}`  | Variable named by everything up to the closing `}`         |
//! | `$X`       | Single-character name, for X one of `*#$@!?-` or a digit  |
//! | `${/}`     | Platform path separator                                    |
//! | `${:}`     | Platform path-list separator                               |
//!
//! Unset variables expand to the empty string, like a shell.  `${}` and the
//! `${` of an unclosed brace are dropped; a `$` that is not followed by a
//! name is kept.
//!
//! Quoted fragments never reach this module.

use super::parse::ArgFragment;
use crate::state::State;

/// Expand every `$` reference in `src` through `lookup`.
///
/// When `in_regexp` is set, substituted values are regex-escaped so that a
/// value like `1.2` only matches itself inside a pattern.
pub fn expand<F>(src: &str, in_regexp: bool, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !src.contains('$') {
        return src.to_owned();
    }

    let mut out = String::with_capacity(src.len() * 2);
    let mut chars = src.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let name = match chars.peek().copied() {
            // A trailing `$` is literal.
            None => {
                out.push('$');
                continue;
            }
            Some('{') => {
                chars.next(); // consume '{'
                let mut probe = chars.clone();
                match read_brace_name(&mut probe) {
                    Some(name) => {
                        chars = probe;
                        if name.is_empty() {
                            continue; // `${}` is eaten
                        }
                        name
                    }
                    // Unclosed: only the `${` is eaten.
                    None => continue,
                }
            }
            Some(c) if is_special(c) => {
                chars.next();
                c.to_string()
            }
            Some(c) if is_name_char(c) => {
                let mut name = String::new();
                while let Some(&nc) = chars.peek() {
                    if !is_name_char(nc) {
                        break;
                    }
                    name.push(nc);
                    chars.next();
                }
                name
            }
            Some(_) => {
                out.push('$');
                continue;
            }
        };

        let value = lookup(&name).unwrap_or_default();
        if in_regexp {
            out.push_str(&regex::escape(&value));
        } else {
            out.push_str(&value);
        }
    }

    out
}

/// Expand the raw fragments of each argument and join them.
///
/// Arguments whose index appears in `regexp_args` are expanded in regexp
/// mode.
pub fn expand_args(state: &State, raw_args: &[Vec<ArgFragment>], regexp_args: &[usize]) -> Vec<String> {
    raw_args
        .iter()
        .enumerate()
        .map(|(i, frags)| {
            let in_regexp = regexp_args.contains(&i);
            let mut arg = String::new();
            for frag in frags {
                if frag.quoted {
                    arg.push_str(&frag.text);
                } else {
                    arg.push_str(&state.expand_env(&frag.text, in_regexp));
                }
            }
            arg
        })
        .collect()
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn is_special(c: char) -> bool {
    matches!(c, '*' | '#' | '$' | '@' | '!' | '?' | '-') || c.is_ascii_digit()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Read up to and including the closing `}`.  `None` if it never closes.
fn read_brace_name(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    let mut name = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return Some(name);
        }
        name.push(c);
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
