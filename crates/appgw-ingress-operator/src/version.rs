//! Build provenance stamped onto every generated gateway configuration

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit the binary was built from (set by the release pipeline)
pub const GIT_COMMIT: &str = match option_env!("GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Build date (set by the release pipeline)
pub const BUILD_DATE: &str = match option_env!("BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// Value of the management tag: `version/commit/build-date`
pub fn management_tag_value() -> String {
    format!("{}/{}/{}", VERSION, GIT_COMMIT, BUILD_DATE)
}
