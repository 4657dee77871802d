//! Tunnel address allocation

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// First host address in `network` that is neither taken nor reserved.
///
/// The network and broadcast addresses are never handed out.
pub fn next_free_ipv4<'a>(
    network: Ipv4Net,
    taken: impl IntoIterator<Item = &'a str>,
    reserved: &[Ipv4Addr],
) -> Option<Ipv4Addr> {
    let taken: HashSet<Ipv4Addr> = taken
        .into_iter()
        .filter_map(|ip| ip.parse().ok())
        .chain(reserved.iter().copied())
        .collect();

    network.hosts().find(|ip| !taken.contains(ip))
}
