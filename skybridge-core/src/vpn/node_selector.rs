//! Weighted-random endpoint node selection
//!
//! Pure functions over a location snapshot; no side effects. The orchestrator
//! feeds its failed-node memory in as the exclusion set.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use log::info;

use super::{VpnError, VpnResult};
use crate::locations::{Location, Node, SelectedEndpoint};

/// Pick a node from the pool.
///
/// A forced hostname wins outright if present in the list. Otherwise nodes
/// under maintenance are filtered out, then the exclusion set is subtracted;
/// if that leaves nothing, the exclusions are ignored (every node has been
/// tried, start over). Selection is weighted-random: the draw ranges over the
/// weight sum of *all* nodes, so excluded weight can push the draw past the
/// candidate set, in which case a uniform pick over the candidates decides.
/// That fallback is the only path on which a zero-weight node can win.
pub fn select_node<'a>(
    nodes: &'a [Node],
    forced: Option<&str>,
    excluded: &HashSet<String>,
) -> VpnResult<&'a Node> {
    if let Some(forced) = forced {
        if let Some(node) = nodes.iter().find(|n| n.hostname == forced) {
            info!("Using forced node {}", node.hostname);
            return Ok(node);
        }
    }

    let valid: Vec<&Node> = nodes.iter().filter(|n| !n.force_disconnect).collect();
    if valid.is_empty() {
        return Err(VpnError::NoValidNode);
    }

    let mut candidates: Vec<&Node> = valid
        .iter()
        .copied()
        .filter(|n| !excluded.contains(&n.hostname))
        .collect();
    if candidates.is_empty() {
        info!("All nodes in this location already tried, selecting from scratch");
        candidates = valid;
    }

    let mut rng = rand::thread_rng();
    let total_weight: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
    if total_weight >= 1 {
        let draw = rng.gen_range(0..total_weight);
        let mut cumulative = 0u64;
        for &node in &candidates {
            cumulative += u64::from(node.weight);
            if draw < cumulative {
                return Ok(node);
            }
        }
    }

    candidates
        .choose(&mut rng)
        .copied()
        .ok_or(VpnError::NoValidNode)
}

/// Build the immutable endpoint snapshot for one connection attempt.
pub fn select_endpoint(
    location: &Location,
    forced: Option<&str>,
    excluded: &HashSet<String>,
) -> VpnResult<SelectedEndpoint> {
    match location {
        Location::Group(group) => {
            let node = select_node(&group.nodes, forced, excluded)?;
            Ok(SelectedEndpoint {
                country_code: group.country_code.clone(),
                dns_hostname: group.dns_hostname.clone(),
                hostname: node.hostname.clone(),
                address: node.address.clone(),
                direct_address: node.direct_address.clone(),
                wg_endpoint: node.wg_endpoint.clone(),
                nickname: group.nickname.clone(),
                city: group.city.clone(),
                group_id: Some(group.id),
                wg_public_key: group.wg_public_key.clone(),
                tls_name: group.tls_name.clone(),
                custom_config: None,
                static_ip_credentials: None,
            })
        }
        Location::StaticIp(static_ip) => {
            let node = &static_ip.node;
            if node.force_disconnect {
                return Err(VpnError::NoValidNode);
            }
            Ok(SelectedEndpoint {
                country_code: static_ip.country_code.clone(),
                dns_hostname: static_ip.node.hostname.clone(),
                hostname: node.hostname.clone(),
                address: node.address.clone(),
                direct_address: node.direct_address.clone(),
                wg_endpoint: node.wg_endpoint.clone(),
                nickname: static_ip.name.clone(),
                city: static_ip.city.clone(),
                group_id: None,
                wg_public_key: static_ip.wg_public_key.clone(),
                tls_name: static_ip.tls_name.clone(),
                custom_config: None,
                static_ip_credentials: Some(static_ip.credentials.clone()),
            })
        }
        Location::Custom(custom) => Ok(SelectedEndpoint {
            country_code: String::new(),
            dns_hostname: custom.server_address.clone(),
            hostname: custom.server_address.clone(),
            address: custom.server_address.clone(),
            direct_address: None,
            wg_endpoint: None,
            nickname: custom.name.clone(),
            city: String::new(),
            group_id: None,
            wg_public_key: None,
            tls_name: None,
            custom_config: Some(custom.clone()),
            static_ip_credentials: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str, weight: u32, force_disconnect: bool) -> Node {
        Node {
            hostname: hostname.to_string(),
            address: format!("10.0.0.{}", weight + 1),
            direct_address: None,
            wg_endpoint: None,
            weight,
            force_disconnect,
        }
    }

    #[test]
    fn test_forced_node_wins_when_present() {
        let nodes = vec![node("a", 100, false), node("b", 1, false)];
        let picked = select_node(&nodes, Some("b"), &HashSet::new()).unwrap();
        assert_eq!(picked.hostname, "b");
    }

    #[test]
    fn test_forced_node_ignored_when_absent() {
        let nodes = vec![node("a", 10, false)];
        let picked = select_node(&nodes, Some("zz"), &HashSet::new()).unwrap();
        assert_eq!(picked.hostname, "a");
    }

    #[test]
    fn test_all_nodes_disabled_is_no_valid_node() {
        let nodes = vec![node("a", 10, true), node("b", 5, true)];
        assert_eq!(
            select_node(&nodes, None, &HashSet::new()).unwrap_err(),
            VpnError::NoValidNode
        );
    }

    #[test]
    fn test_empty_location_is_no_valid_node() {
        assert_eq!(
            select_node(&[], None, &HashSet::new()).unwrap_err(),
            VpnError::NoValidNode
        );
    }

    #[test]
    fn test_zero_weight_sum_falls_back_to_uniform() {
        let nodes = vec![node("a", 0, false), node("b", 0, false)];
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(
                select_node(&nodes, None, &HashSet::new())
                    .unwrap()
                    .hostname
                    .clone(),
            );
        }
        // Uniform selection should reach both nodes comfortably in 200 draws.
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_exclusions_are_dropped_when_everything_failed() {
        let nodes = vec![node("a", 10, false)];
        let excluded: HashSet<String> = ["a".to_string()].into_iter().collect();
        let picked = select_node(&nodes, None, &excluded).unwrap();
        assert_eq!(picked.hostname, "a");
    }

    #[test]
    fn test_excluded_node_not_selected_while_alternatives_remain() {
        let nodes = vec![node("a", 10, false), node("b", 10, false)];
        let excluded: HashSet<String> = ["a".to_string()].into_iter().collect();
        for _ in 0..100 {
            assert_eq!(select_node(&nodes, None, &excluded).unwrap().hostname, "b");
        }
    }

    // Weights {0, 10}: the zero-weight node's selection frequency goes to
    // zero; 1,000 draws must pick the weighted node essentially 100% of the
    // time.
    #[test]
    fn test_weighted_draw_converges_to_weight_share() {
        let nodes = vec![node("a", 0, false), node("b", 10, false)];
        let mut b_count = 0;
        for _ in 0..1_000 {
            if select_node(&nodes, None, &HashSet::new()).unwrap().hostname == "b" {
                b_count += 1;
            }
        }
        assert_eq!(b_count, 1_000);
    }

    #[test]
    fn test_weighted_draw_roughly_proportional() {
        let nodes = vec![node("a", 1, false), node("b", 3, false)];
        let mut b_count = 0;
        for _ in 0..4_000 {
            if select_node(&nodes, None, &HashSet::new()).unwrap().hostname == "b" {
                b_count += 1;
            }
        }
        // Expected ~3000; allow a generous band to keep the test stable.
        assert!((2600..=3400).contains(&b_count), "b drawn {} times", b_count);
    }

    #[test]
    fn test_static_ip_endpoint_carries_dedicated_credentials() {
        use crate::locations::{StaticIpCredentials, StaticIpLocation};
        let location = Location::StaticIp(StaticIpLocation {
            id: 4,
            country_code: "CA".to_string(),
            city: "Toronto".to_string(),
            name: "Office".to_string(),
            static_address: "198.51.100.7".to_string(),
            node: node("static-host", 1, false),
            credentials: StaticIpCredentials {
                username: "office".to_string(),
                password: "pw".to_string(),
            },
            wg_public_key: None,
            tls_name: None,
        });
        let endpoint = select_endpoint(&location, None, &HashSet::new()).unwrap();
        assert_eq!(endpoint.hostname, "static-host");
        assert_eq!(
            endpoint.static_ip_credentials.unwrap().username,
            "office"
        );
    }

    #[test]
    fn test_group_endpoint_snapshot_fields() {
        use crate::locations::ServerGroup;
        let location = Location::Group(ServerGroup {
            id: 5,
            country_code: "FR".to_string(),
            city: "Paris".to_string(),
            nickname: "Baguette".to_string(),
            dns_hostname: "fr.example.net".to_string(),
            wg_public_key: Some("pubkey".to_string()),
            tls_name: Some("fr.example.net".to_string()),
            nodes: vec![node("fr-01", 10, false)],
        });
        let endpoint = select_endpoint(&location, None, &HashSet::new()).unwrap();
        assert_eq!(endpoint.group_id, Some(5));
        assert_eq!(endpoint.city, "Paris");
        assert_eq!(endpoint.wg_public_key.as_deref(), Some("pubkey"));
        assert!(endpoint.custom_config.is_none());
    }
}
