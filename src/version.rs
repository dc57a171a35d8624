//! Version strings for `--version`.
//!
//! Includes the git revision when the build sets `POOLVISOR_GIT_REV`.

use crate::config::{MAX_JOB_DURATION, MAX_TYPES, MAX_WORKERS_PER_TYPE};
use std::sync::LazyLock;

/// The package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git revision baked in at build time (empty string if not set).
pub const GIT_REV: &str = match option_env!("POOLVISOR_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

static FULL_VERSION: LazyLock<String> = LazyLock::new(|| {
    if GIT_REV.is_empty() {
        PKG_VERSION.to_string()
    } else {
        format!("{} ({})", PKG_VERSION, GIT_REV)
    }
});

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}\nlimits: {} worker types, {} workers per type, job duration 1-{}",
        full_version(),
        MAX_TYPES,
        MAX_WORKERS_PER_TYPE,
        MAX_JOB_DURATION
    )
});

/// Returns the full version string for display.
///
/// If built with a git revision, returns `"X.Y.Z (abcdef0)"`.
/// Otherwise, returns just `"X.Y.Z"`.
///
/// # Examples
///
/// ```
/// use poolvisor::version::full_version;
///
/// let version = full_version();
/// assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
/// ```
pub fn full_version() -> String {
    FULL_VERSION.clone()
}

/// Long version for `--version`: the full version plus the compiled-in limits.
pub fn long_version() -> &'static str {
    LONG_VERSION.as_str()
}
