// ── iproute2 output parsing ──
//
// Tolerant line parsers for `ip route`, `ip addr`, `ip rule` and the
// rt_tables registry. Lines that do not describe something we model
// (multipath continuations, blackhole routes, IPv6) are skipped.

use std::net::Ipv4Addr;

use crate::model::{Destination, Ipv4Net, PointToPoint, PolicyRule, RouteEntry};

/// Route types that carry no next hop we could mirror.
const SKIPPED_ROUTE_TYPES: &[&str] = &[
    "blackhole",
    "unreachable",
    "prohibit",
    "throw",
    "local",
    "broadcast",
    "multicast",
    "nat",
    "anycast",
];

/// Parse `ip -4 route show table <t>` output.
pub(crate) fn parse_routes(output: &str) -> Vec<RouteEntry> {
    output.lines().filter_map(parse_route_line).collect()
}

fn parse_route_line(line: &str) -> Option<RouteEntry> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    if SKIPPED_ROUTE_TYPES.contains(&first) {
        return None;
    }
    let destination = if first == "default" {
        Destination::Default
    } else {
        Destination::Prefix(first.parse::<Ipv4Net>().ok()?)
    };

    let mut route = RouteEntry {
        destination,
        gateway: None,
        device: None,
        metric: None,
    };
    while let Some(key) = tokens.next() {
        match key {
            "via" => route.gateway = tokens.next().and_then(|v| v.parse().ok()),
            "dev" => route.device = tokens.next().map(str::to_owned),
            "metric" => route.metric = tokens.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    // A multipath head keeps its next hops on the continuation lines;
    // alone it cannot be re-added anywhere.
    if !route.is_default() && route.gateway.is_none() && route.device.is_none() {
        return None;
    }
    Some(route)
}

/// Parse `ip -4 addr show dev <if>` output into point-to-point pairs.
///
/// Matches lines of the form `inet 10.8.0.6 peer 10.8.0.5/32 scope ...`.
pub(crate) fn parse_point_to_point(output: &str) -> Vec<PointToPoint> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            if tokens.next()? != "inet" {
                return None;
            }
            let local = strip_prefix_len(tokens.next()?)?;
            if tokens.next()? != "peer" {
                return None;
            }
            let peer = strip_prefix_len(tokens.next()?)?;
            Some(PointToPoint { local, peer })
        })
        .collect()
}

fn strip_prefix_len(token: &str) -> Option<Ipv4Addr> {
    token.split('/').next()?.parse().ok()
}

/// Parse `ip -4 rule show` output.
///
/// Only `from <ip> lookup <table>` rules are returned; `from all` and
/// rules keyed on anything other than a single source are skipped.
pub(crate) fn parse_rules(output: &str) -> Vec<PolicyRule> {
    output
        .lines()
        .filter_map(|line| {
            let mut source = None;
            let mut table = None;
            let mut tokens = line.split_whitespace();
            while let Some(key) = tokens.next() {
                match key {
                    "from" => source = tokens.next().and_then(strip_prefix_len),
                    "lookup" | "table" => table = tokens.next().map(str::to_owned),
                    _ => {}
                }
            }
            Some(PolicyRule {
                source: source?,
                table,
            })
        })
        .collect()
}

/// Parse an iproute2 `rt_tables` file into `(id, name)` entries.
pub(crate) fn parse_rt_tables(contents: &str) -> Vec<(u32, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let id = tokens.next()?.parse().ok()?;
            let name = tokens.next()?.to_owned();
            Some((id, name))
        })
        .collect()
}
