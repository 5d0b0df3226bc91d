use k8s_openapi::api::networking::v1::{HTTPIngressRuleValue, Ingress, IngressRule};
use tracing::debug;

use super::{get_target_blacklist, Target};
use crate::prohibited_target::AzureIngressProhibitedTarget;

/// Rules of `ingress` without the routes prohibited by `prohibited_targets`
///
/// Paths are filtered one by one and a rule survives while any path does.
/// A rule without paths is dropped only when its whole host is prohibited.
/// The ingress itself is left untouched.
pub fn prune_ingress_rules(
    ingress: &Ingress,
    prohibited_targets: &[AzureIngressProhibitedTarget],
) -> Option<Vec<IngressRule>> {
    let rules = ingress.spec.as_ref()?.rules.as_ref()?;
    let blacklist = get_target_blacklist(prohibited_targets);
    if rules.is_empty() || blacklist.is_empty() {
        return Some(rules.clone());
    }

    let mut pruned = Vec::with_capacity(rules.len());
    for rule in rules {
        let host = rule.host.clone().unwrap_or_default();
        let paths = rule.http.as_ref().map(|http| http.paths.as_slice()).unwrap_or_default();

        if paths.is_empty() {
            if Target::new(host.clone(), None).is_host_blacklisted(&blacklist) {
                debug!(host = %host, "Dropping rule for prohibited host");
                continue;
            }
            pruned.push(rule.clone());
            continue;
        }

        let kept: Vec<_> = paths
            .iter()
            .filter(|path| {
                let blacklisted = Target::new(host.clone(), path.path.clone()).is_blacklisted(&blacklist);
                if blacklisted {
                    debug!(host = %host, path = ?path.path, "Dropping prohibited path");
                }
                !blacklisted
            })
            .cloned()
            .collect();
        if kept.is_empty() {
            continue;
        }
        pruned.push(IngressRule {
            host: rule.host.clone(),
            http: Some(HTTPIngressRuleValue { paths: kept }),
        });
    }
    Some(pruned)
}
