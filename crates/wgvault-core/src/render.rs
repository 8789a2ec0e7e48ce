//! Rendering of one generated peer into the configuration dialects the
//! supported routers and clients import.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use wgvault_types::ServerProfile;

/// Target configuration syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Standard wg-quick `.conf`, importable by the official clients.
    WgQuick,
    /// iKuai router peer import line.
    Ikuai,
    /// Surge proxy configuration section.
    Surge,
    /// MikroTik RouterOS script.
    Mikrotik,
    /// OpenWrt UCI script.
    OpenWrt,
}

impl Dialect {
    pub fn all() -> [Dialect; 5] {
        [
            Dialect::WgQuick,
            Dialect::Ikuai,
            Dialect::Surge,
            Dialect::Mikrotik,
            Dialect::OpenWrt,
        ]
    }
}

/// Everything a render needs: the client-side interface fields, the chosen
/// server profile, and the peer slot being generated.
#[derive(Debug)]
pub struct RenderInput<'a> {
    pub interface_name: &'a str,
    pub private_key: &'a str,
    pub public_key: &'a str,
    pub address: &'a str,
    pub listen_port: Option<u16>,
    pub dns: Option<&'a str>,
    pub server: &'a ServerProfile,
    pub peer_id: u32,
    pub comment: &'a str,
}

pub fn render(input: &RenderInput<'_>, dialect: Dialect) -> String {
    match dialect {
        Dialect::WgQuick => render_wg_quick(input),
        Dialect::Ikuai => render_ikuai(input),
        Dialect::Surge => render_surge(input),
        Dialect::Mikrotik => render_mikrotik(input),
        Dialect::OpenWrt => render_openwrt(input),
    }
}

fn render_wg_quick(input: &RenderInput<'_>) -> String {
    let server = input.server;
    let mut out = String::new();
    writeln!(out, "[Interface]").unwrap();
    writeln!(out, "PrivateKey = {}", input.private_key).unwrap();
    writeln!(out, "Address = {}", input.address).unwrap();
    if let Some(port) = input.listen_port {
        writeln!(out, "ListenPort = {port}").unwrap();
    }
    if let Some(dns) = input.dns {
        writeln!(out, "DNS = {dns}").unwrap();
    }

    writeln!(out).unwrap();
    writeln!(out, "[Peer]").unwrap();
    writeln!(out, "PublicKey = {}", server.peer_public_key).unwrap();
    if let Some(ref psk) = server.preshared_key {
        writeln!(out, "PresharedKey = {psk}").unwrap();
    }
    writeln!(out, "Endpoint = {}", server.endpoint).unwrap();
    writeln!(out, "AllowedIPs = {}", server.allowed_ips).unwrap();
    if let Some(keepalive) = server.persistent_keepalive {
        writeln!(out, "PersistentKeepalive = {keepalive}").unwrap();
    }
    out
}

/// One key=value line per peer, the shape iKuai's peer management imports.
/// Here the roles flip: the router stores the client's public key and routes
/// the client's tunnel address.
fn render_ikuai(input: &RenderInput<'_>) -> String {
    let server = input.server;
    let mut out = format!(
        "id={} interface={} comment={} public_key={} allowed_ips={}",
        input.peer_id,
        server.router_interface,
        input.comment,
        input.public_key,
        input.address,
    );
    if let Some(ref psk) = server.preshared_key {
        write!(out, " preshared_key={psk}").unwrap();
    }
    if let Some(keepalive) = server.persistent_keepalive {
        write!(out, " keepalive={keepalive}").unwrap();
    }
    out.push('\n');
    out
}

fn render_surge(input: &RenderInput<'_>) -> String {
    let server = input.server;
    let self_ip = input.address.split('/').next().unwrap_or(input.address);
    let mut out = String::new();
    writeln!(out, "[WireGuard {}]", input.interface_name).unwrap();
    writeln!(out, "private-key = {}", input.private_key).unwrap();
    writeln!(out, "self-ip = {self_ip}").unwrap();
    if let Some(dns) = input.dns {
        writeln!(out, "dns-server = {dns}").unwrap();
    }
    let mut peer = format!(
        "peer = (public-key = {}, allowed-ips = \"{}\", endpoint = {}",
        server.peer_public_key, server.allowed_ips, server.endpoint
    );
    if let Some(ref psk) = server.preshared_key {
        write!(peer, ", preshared-key = {psk}").unwrap();
    }
    if let Some(keepalive) = server.persistent_keepalive {
        write!(peer, ", keepalive = {keepalive}").unwrap();
    }
    peer.push(')');
    writeln!(out, "{peer}").unwrap();
    out
}

fn render_mikrotik(input: &RenderInput<'_>) -> String {
    let server = input.server;
    let (host, port) = server
        .endpoint
        .rsplit_once(':')
        .unwrap_or((server.endpoint.as_str(), "51820"));

    let mut out = String::new();
    writeln!(
        out,
        "/interface wireguard add name={} private-key=\"{}\"",
        input.interface_name, input.private_key
    )
    .unwrap();
    writeln!(
        out,
        "/ip address add address={} interface={}",
        input.address, input.interface_name
    )
    .unwrap();
    let mut peer = format!(
        "/interface wireguard peers add interface={} public-key=\"{}\" endpoint-address={} endpoint-port={} allowed-address={}",
        input.interface_name,
        server.peer_public_key,
        host,
        port,
        server.allowed_ips.replace(' ', ""),
    );
    if let Some(ref psk) = server.preshared_key {
        write!(peer, " preshared-key=\"{psk}\"").unwrap();
    }
    if let Some(keepalive) = server.persistent_keepalive {
        write!(peer, " persistent-keepalive={keepalive}s").unwrap();
    }
    writeln!(out, "{peer}").unwrap();
    out
}

fn render_openwrt(input: &RenderInput<'_>) -> String {
    let server = input.server;
    let (host, port) = server
        .endpoint
        .rsplit_once(':')
        .unwrap_or((server.endpoint.as_str(), "51820"));
    let iface = input.interface_name;

    let mut out = String::new();
    writeln!(out, "uci set network.{iface}=interface").unwrap();
    writeln!(out, "uci set network.{iface}.proto='wireguard'").unwrap();
    writeln!(out, "uci set network.{iface}.private_key='{}'", input.private_key).unwrap();
    writeln!(out, "uci add_list network.{iface}.addresses='{}'", input.address).unwrap();
    writeln!(out, "uci add network wireguard_{iface}").unwrap();
    writeln!(
        out,
        "uci set network.@wireguard_{iface}[-1].public_key='{}'",
        server.peer_public_key
    )
    .unwrap();
    if let Some(ref psk) = server.preshared_key {
        writeln!(
            out,
            "uci set network.@wireguard_{iface}[-1].preshared_key='{psk}'"
        )
        .unwrap();
    }
    writeln!(out, "uci set network.@wireguard_{iface}[-1].endpoint_host='{host}'").unwrap();
    writeln!(out, "uci set network.@wireguard_{iface}[-1].endpoint_port='{port}'").unwrap();
    for cidr in server.allowed_ips.split(',') {
        let cidr = cidr.trim();
        if !cidr.is_empty() {
            writeln!(
                out,
                "uci add_list network.@wireguard_{iface}[-1].allowed_ips='{cidr}'"
            )
            .unwrap();
        }
    }
    if let Some(keepalive) = server.persistent_keepalive {
        writeln!(
            out,
            "uci set network.@wireguard_{iface}[-1].persistent_keepalive='{keepalive}'"
        )
        .unwrap();
    }
    writeln!(out, "uci commit network").unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_server(psk: Option<&str>) -> ServerProfile {
        ServerProfile {
            id: "srv1".to_string(),
            name: "home".to_string(),
            peer_public_key: "U0VSVkVSUFVC".to_string(),
            preshared_key: psk.map(str::to_string),
            endpoint: "vpn.example.com:51820".to_string(),
            allowed_ips: "0.0.0.0/0, ::/0".to_string(),
            persistent_keepalive: Some(25),
            router_interface: "wg_0".to_string(),
            next_peer_id: 5,
            created_at: Utc::now(),
        }
    }

    fn sample_input(server: &ServerProfile) -> RenderInput<'_> {
        RenderInput {
            interface_name: "wg0",
            private_key: "Q0xJRU5UUFJJVg==",
            public_key: "Q0xJRU5UUFVC",
            address: "192.168.199.10/32",
            listen_port: None,
            dns: Some("1.1.1.1"),
            server,
            peer_id: 5,
            comment: "laptop",
        }
    }

    #[test]
    fn wg_quick_has_interface_and_peer() {
        let server = sample_server(Some("UFNL"));
        let config = render(&sample_input(&server), Dialect::WgQuick);
        assert!(config.contains("[Interface]"));
        assert!(config.contains("PrivateKey = Q0xJRU5UUFJJVg=="));
        assert!(config.contains("Address = 192.168.199.10/32"));
        assert!(config.contains("DNS = 1.1.1.1"));
        assert!(config.contains("[Peer]"));
        assert!(config.contains("PublicKey = U0VSVkVSUFVC"));
        assert!(config.contains("PresharedKey = UFNL"));
        assert!(config.contains("Endpoint = vpn.example.com:51820"));
        assert!(config.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn wg_quick_omits_absent_fields() {
        let mut server = sample_server(None);
        server.persistent_keepalive = None;
        let mut input = sample_input(&server);
        input.dns = None;
        let config = render(&input, Dialect::WgQuick);
        assert!(!config.contains("PresharedKey"));
        assert!(!config.contains("DNS"));
        assert!(!config.contains("PersistentKeepalive"));
        assert!(!config.contains("ListenPort"));
    }

    #[test]
    fn ikuai_line_uses_client_key_and_address() {
        let server = sample_server(None);
        let line = render(&sample_input(&server), Dialect::Ikuai);
        assert!(line.starts_with("id=5 interface=wg_0 comment=laptop"));
        assert!(line.contains("public_key=Q0xJRU5UUFVC"));
        assert!(line.contains("allowed_ips=192.168.199.10/32"));
        assert!(!line.contains("preshared_key"));
    }

    #[test]
    fn surge_strips_prefix_from_self_ip() {
        let server = sample_server(None);
        let config = render(&sample_input(&server), Dialect::Surge);
        assert!(config.contains("self-ip = 192.168.199.10"));
        assert!(config.contains("[WireGuard wg0]"));
    }

    #[test]
    fn mikrotik_splits_endpoint() {
        let server = sample_server(None);
        let config = render(&sample_input(&server), Dialect::Mikrotik);
        assert!(config.contains("endpoint-address=vpn.example.com"));
        assert!(config.contains("endpoint-port=51820"));
        assert!(config.contains("allowed-address=0.0.0.0/0,::/0"));
    }

    #[test]
    fn openwrt_lists_each_allowed_ip() {
        let server = sample_server(None);
        let config = render(&sample_input(&server), Dialect::OpenWrt);
        assert!(config.contains("allowed_ips='0.0.0.0/0'"));
        assert!(config.contains("allowed_ips='::/0'"));
        assert!(config.contains("uci commit network"));
    }

    #[test]
    fn every_dialect_renders_nonempty() {
        let server = sample_server(Some("UFNL"));
        let input = sample_input(&server);
        for dialect in Dialect::all() {
            assert!(!render(&input, dialect).trim().is_empty());
        }
    }
}
