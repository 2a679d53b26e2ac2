//! Target and port-range parsing
//!
//! Targets may be IPv4/IPv6 addresses, hostnames or CIDR blocks. CIDR blocks
//! expand to their host addresses; hostnames are passed through unresolved so a
//! proxy can resolve them remotely.

use crate::error::ScanError;
use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::str::FromStr;

/// Largest CIDR block that will be expanded (a /16 or a /112)
pub const MAX_CIDR_HOST_BITS: u32 = 16;

/// Expand a single target into the hosts it names
pub fn parse_target(target: &str) -> crate::Result<Vec<String>> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ScanError::InvalidTarget("Empty target".to_string()));
    }

    if target.contains('/') {
        let network = IpNetwork::from_str(target)
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", target, e)))?;
        return expand_network(target, network);
    }

    if target.chars().any(char::is_whitespace) {
        return Err(ScanError::InvalidTarget(format!("Invalid host: {}", target)));
    }

    Ok(vec![target.to_string()])
}

fn expand_network(cidr: &str, network: IpNetwork) -> crate::Result<Vec<String>> {
    let total_bits = if network.is_ipv4() { 32 } else { 128 };
    let host_bits = total_bits - u32::from(network.prefix());
    if host_bits > MAX_CIDR_HOST_BITS {
        return Err(ScanError::InvalidTarget(format!(
            "CIDR network {} too large: /{} (max {} host bits)",
            cidr,
            network.prefix(),
            MAX_CIDR_HOST_BITS
        )));
    }

    let hosts = match network {
        IpNetwork::V4(net) => {
            // Network and broadcast addresses only carry hosts in /31 and /32
            let skip_edges = net.prefix() < 31;
            net.iter()
                .filter(|ip| !skip_edges || (*ip != net.network() && *ip != net.broadcast()))
                .map(|ip| ip.to_string())
                .collect()
        }
        IpNetwork::V6(net) => net.iter().map(|ip| ip.to_string()).collect(),
    };
    Ok(hosts)
}

/// Expand every target, dropping duplicates while keeping first-seen order
pub fn expand_hosts<S: AsRef<str>>(targets: &[S]) -> crate::Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();

    for target in targets {
        // Comma-separated lists are accepted anywhere a single target is
        for part in target.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
            for host in parse_target(part)? {
                if seen.insert(host.clone()) {
                    hosts.push(host);
                }
            }
        }
    }

    if hosts.is_empty() {
        return Err(ScanError::InvalidTarget("No targets specified".to_string()));
    }
    Ok(hosts)
}

/// Parse `"80"` or `"1-1024"` into an inclusive range
pub fn parse_port_range(spec: &str) -> crate::Result<(u16, u16)> {
    let spec = spec.trim();
    let (start, end) = match spec.split_once('-') {
        Some((start, end)) => (start.trim().parse::<u16>()?, end.trim().parse::<u16>()?),
        None => {
            let port = spec.parse::<u16>()?;
            (port, port)
        }
    };

    if start == 0 {
        return Err(ScanError::PortRange("Ports start at 1".to_string()));
    }
    if start > end {
        return Err(ScanError::PortRange(format!(
            "Invalid port range: {} > {}",
            start, end
        )));
    }
    Ok((start, end))
}
