//! Human-readable listings of an engine's commands and conditions.

use std::io::{self, Write};

use crate::error::ScriptError;
use crate::script::cmd::{flag_parser, CmdUsage, REST_ARGS};
use crate::script::engine::Engine;
use crate::state::State;

const DETAIL_COLS: usize = 60;

impl Engine {
    /// Print each command with its arguments and summary, sorted by name.
    ///
    /// `pattern`, if given, is a regular expression the name must match.
    /// With `verbose`, each entry also gets its detail text and flags.
    pub fn list_cmds<W: Write + ?Sized>(&self, w: &mut W, verbose: bool, pattern: Option<&str>) -> Result<(), ScriptError> {
        let re = pattern.map(regex::Regex::new).transpose()?;

        for (name, cmd) in self.cmds() {
            if re.as_ref().is_some_and(|re| !re.is_match(name)) {
                continue;
            }
            let usage = cmd.usage();
            let suffix = if usage.is_async { " [&]" } else { "" };
            let flags = FlagHelp::new(name, usage);

            write!(w, "{name} {}{}{suffix}\n\t{}\n", flags.synopsis(), usage.args, usage.summary)?;

            if !verbose {
                continue;
            }
            if !usage.detail.is_empty() {
                w.write_all(b"\n")?;
                for line in &usage.detail {
                    wrap_line(w, line, DETAIL_COLS, "\t")?;
                }
            }
            if !flags.rows.is_empty() {
                write!(w, "\n\tFlags:\n")?;
                flags.write_rows(w)?;
            }
        }
        Ok(())
    }

    /// Print conditions, one per entry, marking those active in `state`.
    ///
    /// Each tag is `name` or `prefix:suffix`; an empty `tags` lists every
    /// registered condition.  A prefix condition listed without a suffix is
    /// shown as `[name:*]` and never evaluated.
    pub fn list_conds<W: Write + ?Sized>(&self, w: &mut W, state: Option<&State>, tags: &[&str]) -> Result<(), ScriptError> {
        let all: Vec<&str>;
        let tags = if tags.is_empty() {
            all = self.conds().keys().map(String::as_str).collect();
            &all[..]
        } else {
            tags
        };

        for &tag in tags {
            if let Some((prefix, suffix)) = tag.split_once(':') {
                let cond = self
                    .conds()
                    .get(prefix)
                    .ok_or_else(|| ScriptError::UnknownConditionPrefix(prefix.to_owned()))?;
                let usage = cond.usage();
                if !usage.prefix {
                    return Err(ScriptError::ConditionSuffixNotAllowed(prefix.to_owned()));
                }
                let active = state.is_some_and(|s| cond.eval(s, suffix).unwrap_or(false));
                write!(w, "[{tag}]{}\n\t{}\n", active_marker(active), usage.summary)?;
                continue;
            }

            let cond = self.conds().get(tag).ok_or_else(|| ScriptError::UnknownCondition(tag.to_owned()))?;
            let usage = cond.usage();
            if usage.prefix {
                write!(w, "[{tag}:*]\n\t{}\n", usage.summary)?;
            } else {
                let active = state.is_some_and(|s| cond.eval(s, "").unwrap_or(false));
                write!(w, "[{tag}]{}\n\t{}\n", active_marker(active), usage.summary)?;
            }
        }
        Ok(())
    }
}

fn active_marker(active: bool) -> &'static str {
    if active {
        " (active)"
    } else {
        ""
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Declared flags of one command, ready for printing.
struct FlagHelp {
    shorts: String,
    longs: Vec<String>,
    /// `(left column, help text)` per flag.
    rows: Vec<(String, String)>,
}

impl FlagHelp {
    fn new(name: &str, usage: &CmdUsage) -> Self {
        let mut help = FlagHelp { shorts: String::new(), longs: Vec::new(), rows: Vec::new() };
        if usage.flags.is_none() {
            return help;
        }

        let parser = flag_parser(name, usage);
        for arg in parser.get_arguments() {
            let id = arg.get_id().as_str();
            if id == REST_ARGS || id == "help" {
                continue;
            }
            let takes_value = arg.get_action().takes_values();
            let value = arg
                .get_value_names()
                .and_then(|names| names.first())
                .map(|n| n.to_string())
                .unwrap_or_else(|| id.to_owned());

            if let Some(short) = arg.get_short() {
                help.shorts.push(short);
            }
            if let Some(long) = arg.get_long() {
                help.longs.push(if takes_value { format!("[--{long}={value}]") } else { format!("[--{long}]") });
            }

            let mut left = match (arg.get_short(), arg.get_long()) {
                (Some(s), Some(l)) => format!("-{s}, --{l}"),
                (Some(s), None) => format!("-{s}"),
                (None, Some(l)) => format!("    --{l}"),
                (None, None) => id.to_owned(),
            };
            if takes_value {
                left.push(' ');
                left.push_str(&value);
            }
            let text = arg.get_help().map(|h| h.to_string()).unwrap_or_default();
            help.rows.push((left, text));
        }
        help
    }

    /// `[-q] [--count=int] [--quiet] `, or nothing without flags.
    fn synopsis(&self) -> String {
        let mut out = String::new();
        if !self.shorts.is_empty() {
            out.push_str(&format!("[-{}] ", self.shorts));
        }
        if !self.longs.is_empty() {
            out.push_str(&self.longs.join(" "));
            out.push(' ');
        }
        out
    }

    fn write_rows<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let width = self.rows.iter().map(|(left, _)| left.len()).max().unwrap_or(0);
        for (left, text) in &self.rows {
            writeln!(w, "\t  {left:<width$}   {text}")?;
        }
        Ok(())
    }
}

// ── Wrapping ──────────────────────────────────────────────────────────────────

/// Write `line` in chunks of at most `cols` bytes, breaking at spaces, each
/// chunk prefixed by `indent`.  A word longer than `cols` is not split.
pub(crate) fn wrap_line<W: Write + ?Sized>(w: &mut W, line: &str, cols: usize, indent: &str) -> io::Result<()> {
    let mut line = line.trim_start_matches(' ');
    while line.len() > cols {
        let mut best = None;
        for (i, c) in line.char_indices() {
            if c == ' ' {
                if i <= cols || best.is_none() {
                    best = Some(i);
                }
                if i > cols {
                    break;
                }
            }
        }
        let Some(space) = best else { break };
        writeln!(w, "{indent}{}", &line[..space])?;
        line = &line[space + 1..];
    }
    writeln!(w, "{indent}{line}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::script::cmd::{command, Cmd};
    use crate::script::cond::{bool_cond, prefix_cond, Cond};

    fn count_flags(cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("count")
                .long("count")
                .value_name("int")
                .value_parser(clap::value_parser!(usize))
                .help("number of matches"),
        )
        .arg(clap::Arg::new("quiet").long("quiet").short('q').action(clap::ArgAction::SetTrue).help("no log"))
    }

    fn engine() -> Engine {
        let mut cmds: BTreeMap<String, Arc<dyn Cmd>> = BTreeMap::new();
        cmds.insert(
            "match".into(),
            command(
                CmdUsage::new("find a pattern").args("pattern").flags(count_flags).detail(["Details here."]),
                |_, _| Ok(None),
            ),
        );
        cmds.insert("sleep".into(), command(CmdUsage::new("wait a while").args("duration").background(), |_, _| Ok(None)));
        let mut conds: BTreeMap<String, Arc<dyn Cond>> = BTreeMap::new();
        conds.insert("yes".into(), bool_cond("always true", true));
        conds.insert("is".into(), prefix_cond("suffix is x", |_, s| Ok(s == "x")));
        Engine::new(cmds, conds)
    }

    fn listing(f: impl FnOnce(&mut Vec<u8>) -> Result<(), ScriptError>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn short_listing() {
        let e = engine();
        let out = listing(|w| e.list_cmds(w, false, None));
        assert_eq!(
            out,
            "match [-q] [--count=int] [--quiet] pattern\n\tfind a pattern\n\
             sleep duration [&]\n\twait a while\n"
        );
    }

    #[test]
    fn pattern_filters_names() {
        let e = engine();
        let out = listing(|w| e.list_cmds(w, false, Some("^sl")));
        assert!(out.starts_with("sleep"));
        assert!(!out.contains("match"));
        assert!(e.list_cmds(&mut io::sink(), false, Some("(")).is_err());
    }

    #[test]
    fn verbose_listing_has_detail_and_flags() {
        let e = engine();
        let out = listing(|w| e.list_cmds(w, true, Some("^match$")));
        assert!(out.contains("\n\tDetails here.\n"), "{out}");
        assert!(out.contains("\tFlags:\n"), "{out}");
        assert!(out.contains("--count int"), "{out}");
        assert!(out.contains("-q, --quiet"), "{out}");
    }

    #[test]
    fn conds_listing() {
        let e = engine();
        let s = State::for_tests();
        let out = listing(|w| e.list_conds(w, Some(&s), &[]));
        assert_eq!(out, "[is:*]\n\tsuffix is x\n[yes] (active)\n\talways true\n");

        let out = listing(|w| e.list_conds(w, Some(&s), &["is:x", "is:y"]));
        assert_eq!(out, "[is:x] (active)\n\tsuffix is x\n[is:y]\n\tsuffix is x\n");

        assert!(e.list_conds(&mut io::sink(), None, &["nope"]).is_err());
        assert!(e.list_conds(&mut io::sink(), None, &["yes:x"]).is_err());
    }

    #[test]
    fn wrap_breaks_at_spaces() {
        let mut out = Vec::new();
        wrap_line(&mut out, "  aaa bbb ccc", 7, "\t").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\taaa bbb\n\tccc\n");

        let mut out = Vec::new();
        wrap_line(&mut out, "abcdefghij k", 4, "").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "abcdefghij\nk\n");
    }
}
