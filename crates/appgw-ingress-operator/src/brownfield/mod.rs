//! Brownfield deployment support
//!
//! When the gateway is shared with configuration this operator does not
//! own, prohibited targets name the (host, path) pairs it must leave alone.
//! Ingress rules for those targets are pruned before a build, and the
//! existing gateway objects serving them are carried over into the
//! generated configuration.

mod existing;
mod ingress;
mod merge;

use crate::prohibited_target::AzureIngressProhibitedTarget;

pub use existing::{ExistingResources, PreservedResources};
pub use ingress::prune_ingress_rules;
pub use merge::{merge_by_name, merge_preserved};

/// A host and optional path, compared against prohibited targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub hostname: String,
    pub path: Option<String>,
}

impl Target {
    pub fn new(hostname: impl Into<String>, path: Option<String>) -> Self {
        Self {
            hostname: hostname.into(),
            path,
        }
    }

    /// No host and no path: prohibits everything
    pub fn is_universal(&self) -> bool {
        self.hostname.is_empty() && self.path.is_none()
    }

    fn same_host(&self, other: &Target) -> bool {
        self.hostname.eq_ignore_ascii_case(&other.hostname)
    }

    /// True when this blacklist entry covers `target`
    ///
    /// A path entry scoped to a host only covers targets on that host.
    fn covers(&self, target: &Target) -> bool {
        self.covers_with(target, false)
    }

    /// Like [`Target::covers`], except that a hostless listener path also
    /// overlaps a host-scoped path entry: such a listener answers for every
    /// host, the prohibited one included.
    fn covers_listener(&self, target: &Target) -> bool {
        self.covers_with(target, true)
    }

    fn covers_with(&self, target: &Target, hostless_overlaps: bool) -> bool {
        if self.is_universal() {
            return true;
        }
        let Some(prohibited_path) = &self.path else {
            return self.same_host(target);
        };
        let host_matches = self.hostname.is_empty()
            || self.same_host(target)
            || (hostless_overlaps && target.hostname.is_empty());
        match &target.path {
            // A whole host overlaps any prohibited path under it
            None => !target.hostname.is_empty() && host_matches,
            Some(path) => host_matches && path_matches(prohibited_path, path),
        }
    }

    /// True when any entry of `blacklist` covers this ingress target
    pub fn is_blacklisted(&self, blacklist: &[Target]) -> bool {
        blacklist.iter().any(|entry| entry.covers(self))
    }

    /// True when any entry of `blacklist` covers this listener target
    pub fn is_listener_blacklisted(&self, blacklist: &[Target]) -> bool {
        blacklist.iter().any(|entry| entry.covers_listener(self))
    }

    /// True when the whole host of this target is prohibited
    pub(crate) fn is_host_blacklisted(&self, blacklist: &[Target]) -> bool {
        blacklist
            .iter()
            .any(|entry| entry.path.is_none() && (entry.hostname.is_empty() || entry.same_host(self)))
    }
}

/// `prohibited` ending in `*` matches by prefix, anything else exactly
fn path_matches(prohibited: &str, path: &str) -> bool {
    if prohibited == path {
        return true;
    }
    match prohibited.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => false,
    }
}

/// True when some prohibited target locks out the whole gateway
pub fn is_universally_prohibited(prohibited_targets: &[AzureIngressProhibitedTarget]) -> bool {
    prohibited_targets
        .iter()
        .any(|target| target.spec.hostname.is_empty() && target.spec.paths.is_empty())
}

/// Flatten prohibited targets into one entry per (host, path)
pub fn get_target_blacklist(prohibited_targets: &[AzureIngressProhibitedTarget]) -> Vec<Target> {
    let mut blacklist = Vec::new();
    for target in prohibited_targets {
        let spec = &target.spec;
        if spec.paths.is_empty() {
            blacklist.push(Target::new(spec.hostname.clone(), None));
            continue;
        }
        for path in &spec.paths {
            blacklist.push(Target::new(spec.hostname.clone(), Some(path.clone())));
        }
    }
    blacklist.sort();
    blacklist.dedup();
    blacklist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn target(host: &str, path: Option<&str>) -> Target {
        Target::new(host, path.map(str::to_string))
    }

    #[test]
    fn test_get_target_blacklist() {
        let blacklist = get_target_blacklist(&fixtures::prohibited_targets());
        assert_eq!(
            blacklist,
            vec![
                target(fixtures::HOST, Some("/bar")),
                target(fixtures::HOST, Some("/fox")),
            ]
        );
    }

    #[test]
    fn test_host_only_entry_covers_every_path() {
        let blacklist = vec![target("bye.com", None)];
        assert!(target("bye.com", None).is_blacklisted(&blacklist));
        assert!(target("BYE.com", Some("/anything")).is_blacklisted(&blacklist));
        assert!(!target("hi.com", None).is_blacklisted(&blacklist));
        assert!(!target("", Some("/fox")).is_blacklisted(&blacklist));
    }

    #[test]
    fn test_path_entry() {
        let blacklist = vec![target("bye.com", Some("/fox"))];
        assert!(target("bye.com", Some("/fox")).is_blacklisted(&blacklist));
        assert!(!target("bye.com", Some("/hi")).is_blacklisted(&blacklist));
        // A hostless ingress path is not under bye.com
        assert!(!target("", Some("/fox")).is_blacklisted(&blacklist));
        // The host as a whole overlaps the prohibited path
        assert!(target("bye.com", None).is_blacklisted(&blacklist));
        assert!(!target("", None).is_blacklisted(&blacklist));
        assert!(!target("hi.com", Some("/fox")).is_blacklisted(&blacklist));
    }

    #[test]
    fn test_hostless_listener_overlaps_host_scoped_path() {
        let blacklist = vec![target("bye.com", Some("/fox"))];
        assert!(target("", Some("/fox")).is_listener_blacklisted(&blacklist));
        assert!(!target("", Some("/hi")).is_listener_blacklisted(&blacklist));
        assert!(!target("hi.com", Some("/fox")).is_listener_blacklisted(&blacklist));
        assert!(!target("", None).is_listener_blacklisted(&blacklist));
    }

    #[test]
    fn test_hostless_path_entry_covers_every_host() {
        let blacklist = vec![target("", Some("/fox"))];
        assert!(target("", Some("/fox")).is_blacklisted(&blacklist));
        assert!(target("any.com", Some("/fox")).is_blacklisted(&blacklist));
        assert!(!target("any.com", Some("/hi")).is_blacklisted(&blacklist));
    }

    #[test]
    fn test_is_universally_prohibited() {
        assert!(!is_universally_prohibited(&fixtures::prohibited_targets()));
        let mut prohibited = fixtures::prohibited_targets();
        prohibited.push(AzureIngressProhibitedTarget::from_spec("", Vec::new()));
        assert!(is_universally_prohibited(&prohibited));
    }

    #[test]
    fn test_wildcard_path_entry() {
        let blacklist = vec![target("bye.com", Some("/static/*"))];
        assert!(target("bye.com", Some("/static/img.png")).is_blacklisted(&blacklist));
        assert!(target("bye.com", Some("/static/*")).is_blacklisted(&blacklist));
        assert!(!target("bye.com", Some("/api")).is_blacklisted(&blacklist));
    }

    #[test]
    fn test_universal_entry() {
        let blacklist = vec![Target::default()];
        assert!(Target::default().is_universal());
        assert!(target("", None).is_blacklisted(&blacklist));
        assert!(target("any.com", Some("/x")).is_blacklisted(&blacklist));
        assert!(target("any.com", None).is_host_blacklisted(&blacklist));
    }

    #[test]
    fn test_host_blacklisted_ignores_path_entries() {
        let blacklist = get_target_blacklist(&fixtures::prohibited_targets());
        assert!(!target(fixtures::HOST, None).is_host_blacklisted(&blacklist));

        let host_wide = vec![target(fixtures::HOST, None)];
        assert!(target(fixtures::HOST, None).is_host_blacklisted(&host_wide));
    }
}
