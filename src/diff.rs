//! Minimal edit between two mapping rule sets.

use std::collections::HashSet;

use crate::types::MappingRule;

/// Gateway operations needed to move from one rule set to another.
///
/// Removes must be applied before adds so that external ports are freed
/// before they are claimed again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub to_add: Vec<MappingRule>,
    pub to_remove: Vec<MappingRule>,
}

impl RuleDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Computes the rules to remove from and add to `old` to obtain `new`.
///
/// Rules are compared by [`MappingRule::key`].  Rules present in both sets
/// produce no operation.  A rule whose internal port changed is a remove
/// plus an add: the device has no modify primitive.  Duplicate rules within
/// one input are collapsed.  Output order follows the input order.
pub fn diff(old: &[MappingRule], new: &[MappingRule]) -> RuleDiff {
    let wanted: HashSet<_> = new.iter().map(MappingRule::key).collect();

    let mut installed = HashSet::new();
    let mut removed = HashSet::new();
    let mut to_remove = Vec::new();
    for rule in old {
        let key = rule.key();
        if wanted.contains(&key) {
            installed.insert(key);
        } else if removed.insert(key) {
            to_remove.push(rule.clone());
        }
    }

    let mut added = HashSet::new();
    let to_add = new
        .iter()
        .filter(|rule| {
            let key = rule.key();
            !installed.contains(&key) && added.insert(key)
        })
        .cloned()
        .collect();

    RuleDiff { to_add, to_remove }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Protocol;

    const NODE_IP: &str = "192.0.2.1";

    fn rule(name: &str, protocol: Protocol, external: u16, internal: u16) -> MappingRule {
        MappingRule {
            protocol,
            external_port: external,
            internal_host: NODE_IP.to_string(),
            internal_port: internal,
            description: format!("cluster/default/svc/{}", name),
        }
    }

    fn keys(rules: &[MappingRule]) -> HashSet<(Protocol, u16, String, u16)> {
        rules
            .iter()
            .map(|r| {
                (
                    r.protocol,
                    r.external_port,
                    r.internal_host.clone(),
                    r.internal_port,
                )
            })
            .collect()
    }

    #[test]
    fn test_patch_load_balancer() {
        let a = rule("svc-port-1", Protocol::Tcp, 12345, 34567);
        let b = rule("svc-port-2", Protocol::Tcp, 12345, 23456);
        let c = rule("svc-port-1", Protocol::Tcp, 12345, 45678);

        let d = diff(&[a.clone(), b.clone()], &[b, c.clone()]);

        assert_eq!(d.to_remove, vec![a]);
        assert_eq!(d.to_add, vec![c]);
    }

    #[test]
    fn test_description_is_not_compared() {
        let a = rule("svc-port-1", Protocol::Tcp, 12345, 34567);
        let b = rule("svc-port-2", Protocol::Tcp, 12345, 23456);
        let renamed_b = rule("svc-port-1", Protocol::Tcp, 12345, 23456);

        let d = diff(&[a.clone(), b], &[renamed_b]);

        assert_eq!(d.to_remove, vec![a]);
        assert!(d.to_add.is_empty());
    }

    #[test]
    fn test_internal_port_change_is_remove_and_add() {
        let old = rule("http", Protocol::Tcp, 80, 30080);
        let new = rule("http", Protocol::Tcp, 80, 30081);

        let d = diff(&[old.clone()], &[new.clone()]);

        assert_eq!(d.to_remove, vec![old]);
        assert_eq!(d.to_add, vec![new]);
    }

    #[test]
    fn test_protocol_distinguishes_rules() {
        let tcp = rule("dns", Protocol::Tcp, 53, 30053);
        let udp = rule("dns", Protocol::Udp, 53, 30053);

        let d = diff(&[tcp.clone()], &[tcp, udp.clone()]);

        assert!(d.to_remove.is_empty());
        assert_eq!(d.to_add, vec![udp]);
    }

    #[test]
    fn test_same_set_is_empty_diff() {
        let set = vec![
            rule("a", Protocol::Tcp, 80, 30080),
            rule("b", Protocol::Udp, 53, 30053),
            rule("c", Protocol::Tcp, 443, 30443),
        ];
        assert!(diff(&set, &set).is_empty());
        assert!(diff(&[], &[]).is_empty());
    }

    #[test]
    fn test_from_and_to_empty() {
        let set = vec![
            rule("a", Protocol::Tcp, 80, 30080),
            rule("b", Protocol::Udp, 53, 30053),
        ];

        let create = diff(&[], &set);
        assert_eq!(create.to_add, set);
        assert!(create.to_remove.is_empty());

        let delete = diff(&set, &[]);
        assert_eq!(delete.to_remove, set);
        assert!(delete.to_add.is_empty());
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let a = rule("a", Protocol::Tcp, 80, 30080);
        let b = rule("b", Protocol::Tcp, 81, 30081);

        let d = diff(&[b.clone(), b.clone()], &[a.clone(), a.clone()]);

        assert_eq!(d.to_remove, vec![b]);
        assert_eq!(d.to_add, vec![a]);
    }

    #[test]
    fn test_diff_is_minimal() {
        let pool: Vec<MappingRule> = (0..6u16)
            .map(|i| {
                let protocol = if i % 2 == 0 { Protocol::Tcp } else { Protocol::Udp };
                rule(&format!("p{}", i), protocol, 8000 + i / 2, 30000 + i)
            })
            .collect();

        // Every pair of subsets of the pool, selected by bitmask.
        for old_mask in 0u32..64 {
            for new_mask in 0u32..64 {
                let pick = |mask: u32| -> Vec<MappingRule> {
                    pool.iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1 << i) != 0)
                        .map(|(_, r)| r.clone())
                        .collect()
                };
                let old = pick(old_mask);
                let new = pick(new_mask);
                let d = diff(&old, &new);

                let old_keys = keys(&old);
                let add_keys = keys(&d.to_add);
                let remove_keys = keys(&d.to_remove);
                assert!(add_keys.is_disjoint(&old_keys));
                assert!(remove_keys.is_subset(&old_keys));

                let result: HashSet<_> = old_keys
                    .difference(&remove_keys)
                    .cloned()
                    .chain(add_keys)
                    .collect();
                assert_eq!(result, keys(&new));
            }
        }
    }
}
