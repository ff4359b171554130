//! The default condition set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::script::cond::{bool_cond, once_cond, prefix_cond, Cond};
use crate::state::State;

/// Every default condition, keyed by name.
pub fn default_conds() -> BTreeMap<String, Arc<dyn Cond>> {
    let mut conds: BTreeMap<String, Arc<dyn Cond>> = BTreeMap::new();
    conds.insert(
        "os".into(),
        prefix_cond("the host operating system is <suffix>", |_, suffix| Ok(suffix == std::env::consts::OS)),
    );
    conds.insert(
        "arch".into(),
        prefix_cond("the host architecture is <suffix>", |_, suffix| Ok(suffix == std::env::consts::ARCH)),
    );
    conds.insert(
        "env".into(),
        prefix_cond("environment variable <suffix> is set and non-empty", |s, suffix| {
            Ok(s.lookup_env(suffix).is_some_and(|v| !v.is_empty()))
        }),
    );
    conds.insert(
        "exec".into(),
        prefix_cond("<suffix> names an executable in the script's PATH", |s, suffix| {
            Ok(look_path(s, suffix).is_some())
        }),
    );
    conds.insert("unix".into(), bool_cond("the host is a Unix system", cfg!(unix)));
    conds.insert("root".into(), once_cond("the effective user is root", is_root));
    conds
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid(2) has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Find `name` the way a shell would, using the state's `PATH` and
/// working directory.
fn look_path(s: &State, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let path = s.path(name);
        return is_executable_file(&path).then_some(path);
    }
    let path_var = s.lookup_env("PATH")?;
    std::env::split_paths(path_var)
        .map(|dir| s.path(dir).join(name))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else { return false };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
