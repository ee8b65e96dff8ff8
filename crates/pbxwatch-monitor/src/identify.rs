//! Agent-name and network-address extraction from raw event fields.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::sync;

/// Whether `name` looks like a provisioned extension: non-empty, digits only.
pub(crate) fn is_extension(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Agent name from a channel name: the text after the first `/`, up to the
/// first `-`.
///
/// `PJSIP/101-0000002a` → `101`. Trunks (`PJSIP/carrier-01`) and local
/// channels (`Local/200@from-queue-01;1`) are not agents and yield `None`.
pub fn agent_from_channel(channel: &str) -> Option<&str> {
    let (_, rest) = channel.split_once('/')?;
    let name = rest.split('-').next().unwrap_or(rest);
    is_extension(name).then_some(name)
}

/// Agent name from a device identifier such as `PJSIP/101`.
pub fn agent_from_device(device: &str) -> Option<&str> {
    let (_, rest) = device.split_once("PJSIP/")?;
    is_extension(rest).then_some(rest)
}

/// Agent name from a queue member name, which may be a bare name or an
/// interface like `PJSIP/101`.
pub(crate) fn agent_from_member(member: &str) -> &str {
    member.rsplit('/').next().unwrap_or(member)
}

/// Host from a contact URI: after `@`, before any `;` parameters or `:`
/// port. IPv6 hosts in brackets are returned without the brackets.
///
/// `sip:101@10.0.0.5:5060;transport=udp` → `10.0.0.5`. Returns an empty
/// string when the URI has no `@`.
pub fn ip_from_uri(uri: &str) -> &str {
    match uri.split_once('@') {
        Some((_, host)) => bare_host(host),
        None => "",
    }
}

/// Host from a registration address, which is either `host:port` or a
/// path-like form ending in a contact URI (`PJSIP/101/sip:101@host:port`).
pub fn ip_from_address(address: &str) -> &str {
    let tail = address.rsplit('/').next().unwrap_or(address);
    match tail.split_once('@') {
        Some((_, host)) => bare_host(host),
        None => bare_host(
            tail.strip_prefix("sips:")
                .or_else(|| tail.strip_prefix("sip:"))
                .unwrap_or(tail),
        ),
    }
}

fn bare_host(host: &str) -> &str {
    let host = host.split(';').next().unwrap_or(host);
    if let Some(v6) = host.strip_prefix('[') {
        return v6.split(']').next().unwrap_or(v6);
    }
    host.split(':').next().unwrap_or(host)
}

/// Last address seen for each agent, independent of tenant.
///
/// Contact reachability events carry the address but cannot be attributed
/// to a tenant; later agent updates pick the address up from here.
#[derive(Debug, Default)]
pub struct IpCache {
    addresses: RwLock<HashMap<String, String>>,
}

impl IpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent: &str) -> Option<String> {
        sync::read(&self.addresses, "ip_cache").get(agent).cloned()
    }

    pub fn insert(&self, agent: &str, ip: &str) {
        sync::write(&self.addresses, "ip_cache").insert(agent.to_string(), ip.to_string());
    }
}
