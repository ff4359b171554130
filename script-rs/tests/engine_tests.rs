/// End-to-end tests: whole scripts run through an [`Engine`] with the
/// default registries plus a few test commands, checking the returned error
/// and the text written to the log.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use script::{
    command, default_cmds, default_conds, wait_fn, Cmd, CmdOutput, CmdUsage, Context, Engine, EngineConfig,
    ScriptError, State,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn test_config() -> EngineConfig {
    EngineConfig {
        quiet: false,
        retry_interval: Duration::from_millis(1),
        max_retry_interval: Duration::from_millis(4),
    }
}

fn engine_with(extra: Vec<(&str, Arc<dyn Cmd>)>) -> Engine {
    let mut cmds = default_cmds();
    for (name, cmd) in extra {
        cmds.insert(name.to_owned(), cmd);
    }
    Engine::new(cmds, default_conds()).with_config(test_config())
}

fn engine() -> Engine {
    engine_with(Vec::new())
}

fn state() -> State {
    State::new(&Context::background(), std::env::temp_dir(), ["FOO=1", "DOT=a.b"]).unwrap()
}

async fn run(engine: &Engine, s: &mut State, script: &str) -> (Result<(), ScriptError>, String) {
    let mut log = Vec::new();
    let res = engine.execute(s, "test.txt", script, &mut log).await;
    (res, String::from_utf8(log).unwrap())
}

/// Fails its first `failures` calls, then succeeds.
fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn Cmd> {
    command(CmdUsage::new("fail a few times"), move |_, _| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(ScriptError::msg(format!("attempt {n} failed")))
        } else {
            Ok(None)
        }
    })
}

/// Succeeds its first `successes` calls, then fails.
fn flip(successes: usize, calls: Arc<AtomicUsize>) -> Arc<dyn Cmd> {
    command(CmdUsage::new("succeed a few times"), move |_, _| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < successes {
            Ok(None)
        } else {
            Err(ScriptError::msg("gone"))
        }
    })
}

fn counter(calls: Arc<AtomicUsize>) -> Arc<dyn Cmd> {
    command(CmdUsage::new("count calls"), move |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    })
}

fn bg_fail() -> Arc<dyn Cmd> {
    command(CmdUsage::new("fail in the background").background(), |_, _| {
        Ok(Some(wait_fn(|_| CmdOutput::failed(ScriptError::msg("bg boom")))))
    })
}

// ── Sections and logging ──────────────────────────────────────────────────────

#[tokio::test]
async fn section_header_gets_elapsed_time() {
    let (res, log) = run(&engine(), &mut state(), "# greet\necho hi\n").await;
    res.unwrap();
    assert!(log.starts_with("# greet ("), "{log}");
    assert!(log.contains("s)\n> echo hi\n[stdout]\nhi\n"), "{log}");
}

#[tokio::test]
async fn empty_section_gets_no_time() {
    let (res, log) = run(&engine(), &mut state(), "# empty\n# next\necho\n").await;
    res.unwrap();
    assert!(log.starts_with("# empty\n# next ("), "{log}");
}

#[tokio::test]
async fn quiet_mode_drops_successful_sections() {
    let engine = engine().with_config(EngineConfig { quiet: true, ..test_config() });

    let (res, log) = run(&engine, &mut state(), "# one\necho hi\n# two\necho there\n").await;
    res.unwrap();
    assert!(log.starts_with("# one ("), "{log}");
    assert!(!log.contains("> echo"), "{log}");

    let (res, log) = run(&engine, &mut state(), "# one\necho hi\n# two\n! echo there\n").await;
    assert!(res.is_err());
    assert!(!log.contains("> echo hi"), "{log}");
    assert!(log.contains("> ! echo there\n"), "{log}");
}

#[tokio::test]
async fn blank_and_comment_lines_are_skipped() {
    let (res, log) = run(&engine(), &mut state(), "\n   \necho a # trailing comment\n").await;
    res.unwrap();
    assert_eq!(log, "> echo a # trailing comment\n[stdout]\na\n");
}

// ── Expected status ───────────────────────────────────────────────────────────

#[tokio::test]
async fn negated_success_is_an_error() {
    let (res, _) = run(&engine(), &mut state(), "! echo hi\n").await;
    let err = res.unwrap_err();
    assert_eq!(err.to_string(), "test.txt:1: echo hi: unexpected success");
    assert!(err.has_location());
}

#[tokio::test]
async fn expected_failure_is_logged_not_returned() {
    let (res, log) = run(&engine(), &mut state(), "! cat missing-file\n? cat missing-file\n").await;
    res.unwrap();
    assert_eq!(log.matches("> ").count(), 2);
    assert_eq!(log.lines().filter(|l| l.starts_with('[')).count(), 2, "{log}");
}

#[tokio::test]
async fn failure_reports_location_and_args() {
    let (res, log) = run(&engine(), &mut state(), "echo ok\ncat 'no such file'\necho never\n").await;
    let err = res.unwrap_err();
    assert!(err.to_string().starts_with("test.txt:2: cat 'no such file': "), "{err}");
    assert!(!log.contains("never"));
}

#[tokio::test]
async fn unknown_command_and_parse_errors() {
    let (res, _) = run(&engine(), &mut state(), "nope 1 2\n").await;
    assert_eq!(res.unwrap_err().to_string(), "test.txt:1: nope 1 2: unknown command");

    let (res, log) = run(&engine(), &mut state(), "echo\necho 'oops\n").await;
    assert_eq!(res.unwrap_err().to_string(), "test.txt:2: parse error: unterminated quoted argument");
    assert!(log.contains("> echo 'oops\n"));

    let (res, _) = run(&engine(), &mut state(), "! ? echo\n").await;
    assert_eq!(
        res.unwrap_err().to_string(),
        "test.txt:1: parse error: duplicated '!', '?', '*' or '!*' token"
    );
}

// ── Stop ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_halts_without_error() {
    let (res, log) = run(&engine(), &mut state(), "# s\necho a\nstop\necho b\n").await;
    res.unwrap();
    assert!(log.ends_with("> stop\nstop\n"), "{log}");
    assert!(!log.contains("> echo b"));
}

#[tokio::test]
async fn stop_message_is_logged_even_when_negated() {
    let (res, log) = run(&engine(), &mut state(), "! stop 'early exit'\necho b\n").await;
    res.unwrap();
    assert!(log.ends_with("stop: early exit\n"), "{log}");
}

#[tokio::test]
async fn stop_leaves_background_tasks() {
    let mut s = state();
    let (res, _) = run(&engine(), &mut s, "sleep 1h &\nstop\n").await;
    res.unwrap();
    assert_eq!(s.background_len(), 1);
    assert!(s.close_and_wait(&mut std::io::sink()).await.unwrap_err().is_wait());
}

// ── Conditions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn conditions_gate_commands() {
    let mut s = state();
    let (res, log) = run(&engine(), &mut s, "[env:FOO] echo yes\n[!env:FOO] echo no\n[env:BAR] echo bar\n").await;
    res.unwrap();
    assert_eq!(s.stdout(), "yes\n");
    assert_eq!(log.matches("[condition not met]\n").count(), 2, "{log}");
}

#[tokio::test]
async fn condition_errors_carry_line() {
    let (res, _) = run(&engine(), &mut state(), "echo\n[bogus] echo\n").await;
    assert_eq!(res.unwrap_err().to_string(), "test.txt:2: unknown condition \"bogus\"");

    let (res, _) = run(&engine(), &mut state(), "[env] echo\n").await;
    assert_eq!(res.unwrap_err().to_string(), "test.txt:1: condition \"env\" requires a suffix");
}

// ── Expansion ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn expansion_skips_quoted_text() {
    let mut s = state();
    let (res, _) = run(&engine(), &mut s, "echo $FOO '$FOO' x${FOO}y\n").await;
    res.unwrap();
    assert_eq!(s.stdout(), "1 $FOO x1y\n");
}

#[tokio::test]
async fn regexp_args_are_escaped() {
    let (res, log) = run(&engine(), &mut state(), "echo axb\n! stdout $DOT\necho a.b\nstdout ^$DOT$\n").await;
    res.unwrap();
    assert!(log.contains("[no match for `a\\.b` in stdout]\n"), "{log}");
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn help_flag_prints_usage() {
    let mut s = state();
    let (res, log) = run(&engine(), &mut s, "echo -h\n").await;
    res.unwrap();
    assert!(s.stdout().contains("echo string...\n\tdisplay a line of text\n"), "{}", s.stdout());
    assert!(log.contains("[stdout]\necho string..."), "{log}");
}

#[tokio::test]
async fn bad_flags_fail_only_commands_that_declare_them() {
    let mut s = state();
    let (res, _) = run(&engine(), &mut s, "echo -n x\n").await;
    res.unwrap();
    assert_eq!(s.stdout(), "-n x\n");

    let (res, _) = run(&engine(), &mut s, "stdout --bogus x\n").await;
    assert!(res.unwrap_err().to_string().starts_with("test.txt:1: stdout --bogus x: "));
}

#[tokio::test]
async fn non_async_command_cannot_run_in_background() {
    let (res, _) = run(&engine(), &mut state(), "echo hi &\n").await;
    assert_eq!(res.unwrap_err().to_string(), "test.txt:1: echo hi: command cannot be run in background");
}

// ── Background ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn background_clears_output_until_wait() {
    let mut s = state();
    let (res, log) = run(&engine(), &mut s, "echo x\nsleep 1ms &\n! stdout x\nwait\n").await;
    res.unwrap();
    assert_eq!(s.background_len(), 0);
    assert!(log.contains("[background] sleep 1ms\n"), "{log}");
}

#[tokio::test]
async fn wait_collects_background_output() {
    let out = command(CmdUsage::new("print later").background(), |_, args| {
        let text = args.join(" ");
        Ok(Some(wait_fn(move |_| CmdOutput::stdout(format!("{text}\n")))))
    });
    let mut s = state();
    let (res, _) = run(&engine_with(vec![("later", out)]), &mut s, "later one &\nlater two &\nwait\n").await;
    res.unwrap();
    assert_eq!(s.stdout(), "one\ntwo\n");
}

#[tokio::test]
async fn wait_surfaces_background_failure_regardless_of_status() {
    let engine = engine_with(vec![("bgfail", bg_fail())]);

    let (res, log) = run(&engine, &mut state(), "bgfail &\n? wait\n").await;
    let err = res.unwrap_err();
    assert!(err.is_wait());
    assert!(err.to_string().contains("test.txt:1: bgfail: bg boom"), "{err}");
    assert!(log.contains("[background] bgfail\n[bg boom]\n"), "{log}");

    let (res, _) = run(&engine, &mut state(), "! bgfail &\nwait\n").await;
    res.unwrap();
}

#[tokio::test]
async fn close_and_wait_cancels_background_tasks() {
    let mut s = state();
    let (res, _) = run(&engine(), &mut s, "sleep 1h &\n").await;
    res.unwrap();

    let mut log = Vec::new();
    let err = s.close_and_wait(&mut log).await.unwrap_err();
    assert!(err.is_wait());
    assert!(err.to_string().contains("sleep 1h: context canceled"), "{err}");
    assert!(String::from_utf8(log).unwrap().contains("[background] sleep 1h\n"));
}

#[tokio::test]
async fn unwaited_background_failure_does_not_fail_script() {
    let mut s = state();
    let (res, log) = run(&engine_with(vec![("bgfail", bg_fail())]), &mut s, "bgfail &\necho done\n").await;
    res.unwrap();
    assert_eq!(s.background_len(), 1);
    assert_eq!(s.stdout(), "done\n");
    assert!(!log.contains("bg boom"), "{log}");

    let mut log = Vec::new();
    let err = s.close_and_wait(&mut log).await.unwrap_err();
    assert!(err.is_wait());
    assert!(err.to_string().contains("test.txt:1: bgfail: bg boom"), "{err}");
    assert!(String::from_utf8(log).unwrap().contains("[background] bgfail\n[bg boom]\n"));
}

// ── Retry ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_replays_whole_section() {
    let flaky_calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::new(AtomicUsize::new(0));
    let engine = engine_with(vec![
        ("flaky", flaky(2, flaky_calls.clone())),
        ("count", counter(counted.clone())),
    ]);

    let mut s = state();
    let (res, log) = run(&engine, &mut s, "# section\ncount\n* flaky\necho after\n").await;
    res.unwrap();

    assert_eq!(flaky_calls.load(Ordering::SeqCst), 3);
    assert_eq!(counted.load(Ordering::SeqCst), 3);
    assert_eq!(s.retry_count(), 0);
    assert!(log.contains("(command \"* flaky\" failed, retrying in 1ms...)\n"), "{log}");
    assert!(log.contains("(command \"* flaky\" failed, retrying in 2ms...)\n"), "{log}");
    assert!(log.contains("(command \"* flaky\" succeeded after 2 retries in "), "{log}");
    assert!(log.contains("> echo after\n"), "{log}");
}

#[tokio::test]
async fn retry_replay_starts_at_section_boundary() {
    let before = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));
    let engine = engine_with(vec![
        ("before", counter(before.clone())),
        ("inside", counter(inside.clone())),
        ("flaky", flaky(1, Arc::new(AtomicUsize::new(0)))),
    ]);

    let (res, _) = run(&engine, &mut state(), "before\n# retried\ninside\n* flaky\n").await;
    res.unwrap();
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(inside.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_until_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = engine_with(vec![("flip", flip(2, calls.clone()))]);
    let (res, log) = run(&engine, &mut state(), "!* flip\n").await;
    res.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(log.contains("succeeded after 2 retries"), "{log}");
}

#[tokio::test]
async fn retry_delays_are_capped() {
    let engine = engine_with(vec![("flaky", flaky(5, Arc::new(AtomicUsize::new(0))))]);
    let (res, log) = run(&engine, &mut state(), "* flaky\n").await;
    res.unwrap();
    let delays: Vec<&str> = log
        .lines()
        .filter_map(|l| l.strip_prefix("(command \"* flaky\" failed, retrying in "))
        .collect();
    assert_eq!(delays, vec!["1ms...)", "2ms...)", "4ms...)", "4ms...)", "4ms...)"]);
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_context_stops_before_first_line() {
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let mut s = State::new(&ctx, std::env::temp_dir(), Vec::<String>::new()).unwrap();

    let (res, log) = run(&engine(), &mut s, "echo never\n").await;
    let err = res.unwrap_err();
    assert!(err.is_cancellation());
    assert!(!err.has_location());
    assert_eq!(err.to_string(), "test.txt:0: context canceled");
    assert!(log.is_empty());
}

#[tokio::test]
async fn deadline_interrupts_retry_loop() {
    let ctx = Context::background().with_timeout(Duration::from_millis(30));
    let mut s = State::new(&ctx, std::env::temp_dir(), Vec::<String>::new()).unwrap();
    let engine = engine_with(vec![("flaky", flaky(usize::MAX, Arc::new(AtomicUsize::new(0))))]);

    let (res, _) = run(&engine, &mut s, "echo a\n* flaky\n").await;
    let err = res.unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(err.to_string(), "test.txt:2: context deadline exceeded");
    assert_eq!(s.retry_count(), 0);
}

// ── Panics ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn panicking_command_still_flushes_section_log() {
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;

    let boom = command(CmdUsage::new("panic"), |_, _| panic!("command exploded"));
    let engine = engine_with(vec![("boom", boom)]);
    let mut s = state();
    let mut log = Vec::new();

    let res = AssertUnwindSafe(engine.execute(&mut s, "test.txt", "# sec\necho hi\nboom\n", &mut log))
        .catch_unwind()
        .await;
    assert!(res.is_err());

    let log = String::from_utf8(log).unwrap();
    assert!(log.starts_with("# sec ("), "{log}");
    assert!(log.ends_with("> echo hi\n[stdout]\nhi\n> boom\n"), "{log}");
    assert!(s.engine().is_none());
}

// ── Single lines ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_line_runs_one_command() {
    let engine = engine();
    let mut s = state();
    let mut log = Vec::new();

    engine.execute_line(&mut s, "echo $FOO", &mut log).await.unwrap();
    assert_eq!(s.stdout(), "1\n");
    engine.execute_line(&mut s, "[env:NOPE] echo x", &mut log).await.unwrap();
    engine.execute_line(&mut s, "", &mut log).await.unwrap();

    let err = engine.execute_line(&mut s, "! echo x", &mut log).await.unwrap_err();
    assert_eq!(err.to_string(), "<stdin>:0: echo x: unexpected success");
    assert_eq!(String::from_utf8(log).unwrap(), "[stdout]\n1\n[condition not met]\n[stdout]\nx\n");
}

// ── Script files ──────────────────────────────────────────────────────────────

/// Every script under testdata/ runs to completion in a fresh directory.
#[tokio::test]
async fn testdata_scripts_pass() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata");
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("cannot open {}: {e}", dir.display()))
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|x| x == "txt"))
        .collect();
    entries.sort();
    assert!(!entries.is_empty(), "no scripts found in {}", dir.display());

    let engine = engine();
    for path in &entries {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let src = std::fs::read_to_string(path).unwrap();
        let work = tempfile::tempdir().unwrap();
        let mut s = State::new(&Context::background(), work.path(), ["NAME=world"]).unwrap();

        let mut log = Vec::new();
        let res = engine.execute(&mut s, &name, &src, &mut log).await;
        let res = res.and(s.close_and_wait(&mut log).await);
        if let Err(e) = res {
            panic!("{name}: {e}\n{}", String::from_utf8_lossy(&log));
        }
    }
}
