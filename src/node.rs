use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use serde_json::json;
use serde_json::Value;
use serde_yaml::Value as Yamlv;

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    Hysteria2,
}

impl Kind {
    pub fn scheme(&self) -> &'static str {
        match self {
            Kind::Vmess => "vmess",
            Kind::Vless => "vless",
            Kind::Trojan => "trojan",
            Kind::Shadowsocks => "ss",
            Kind::Hysteria2 => "hysteria2",
        }
    }

    pub fn from_scheme(s: &str) -> Option<Kind> {
        match s {
            "vmess" => Some(Kind::Vmess),
            "vless" => Some(Kind::Vless),
            "trojan" => Some(Kind::Trojan),
            "ss" => Some(Kind::Shadowsocks),
            "hysteria2" | "hy2" => Some(Kind::Hysteria2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    Grpc,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
        }
    }

    // 其余传输类型(h2/quic/httpupgrade等)统一按tcp处理
    pub fn from_str_lossy(s: &str) -> Network {
        match s {
            "ws" | "websocket" => Network::Ws,
            "grpc" | "gun" => Network::Grpc,
            _ => Network::Tcp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TransportOpts {
    pub network: Network,
    pub tls: bool,
    pub sni: Option<String>,
    pub path: Option<String>,
    pub host_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyNode {
    pub kind: Kind,
    pub server: String,
    pub port: u16,
    pub credentials: BTreeMap<String, String>,
    pub transport: TransportOpts,
    pub display_name: String,
}

impl ProxyNode {
    pub fn new(kind: Kind) -> ProxyNode {
        ProxyNode {
            kind,
            server: String::new(),
            port: 0,
            credentials: BTreeMap::new(),
            transport: TransportOpts::default(),
            display_name: String::new(),
        }
    }

    // 端口必须在[1,65535]内
    pub fn check_port(raw: u32) -> Result<u16, ParseError> {
        if (1..=65535).contains(&raw) {
            Ok(raw as u16)
        } else {
            Err(ParseError::InvalidPort(raw))
        }
    }

    /// Enforces the per-kind invariants; every parse path ends here.
    pub fn validated(self) -> Result<ProxyNode, ParseError> {
        if self.server.trim().is_empty() {
            return Err(ParseError::MissingField("server"));
        }
        if self.port == 0 {
            return Err(ParseError::InvalidPort(0));
        }
        let need: &[&'static str] = match self.kind {
            Kind::Vmess | Kind::Vless => &["uuid"],
            Kind::Trojan | Kind::Hysteria2 => &["password"],
            Kind::Shadowsocks => &["method", "password"],
        };
        for key in need {
            match self.credentials.get(*key) {
                Some(v) if !v.is_empty() => {}
                _ => return Err(ParseError::MissingField(key)),
            }
        }
        Ok(self)
    }

    fn cred(&self, key: &str) -> &str {
        self.credentials.get(key).map_or("", |s| s.as_str())
    }

    // ipv6地址在URI里需要加方括号
    fn host_for_uri(&self) -> String {
        if self.server.contains(':') {
            format!("[{}]", self.server)
        } else {
            self.server.clone()
        }
    }

    /// Inverse of `proto::parse` with a fixed query-parameter order, so
    /// nodes that parsed without heuristic fallbacks round-trip exactly.
    pub fn serialize(&self) -> String {
        match self.kind {
            Kind::Vmess => self.serialize_vmess(),
            Kind::Vless => self.serialize_vless(),
            Kind::Trojan => self.serialize_trojan(),
            Kind::Shadowsocks => self.serialize_ss(),
            Kind::Hysteria2 => self.serialize_hysteria2(),
        }
    }

    fn serialize_vmess(&self) -> String {
        let t = &self.transport;
        let payload = json!({
            "v": "2",
            "ps": self.display_name,
            "add": self.server,
            "port": self.port.to_string(),
            "id": self.cred("uuid"),
            "aid": self.credentials.get("aid").map_or("0", |s| s.as_str()),
            "scy": self.credentials.get("scy").map_or("auto", |s| s.as_str()),
            "net": t.network.as_str(),
            "type": "none",
            "host": t.host_header.as_deref().unwrap_or(""),
            "path": t.path.as_deref().unwrap_or(""),
            "tls": if t.tls { "tls" } else { "" },
            "sni": t.sni.as_deref().unwrap_or(""),
        });
        let s = serde_json::to_string(&payload).unwrap_or_default();
        format!("vmess://{}", STANDARD.encode(s))
    }

    fn serialize_vless(&self) -> String {
        let t = &self.transport;
        let mut uri = format!(
            "vless://{}@{}:{}",
            self.cred("uuid"),
            self.host_for_uri(),
            self.port
        );
        let mut q: Vec<String> = vec![format!("type={}", t.network.as_str())];
        q.push(format!("security={}", if t.tls { "tls" } else { "none" }));
        if let Some(ref sni) = t.sni {
            q.push(format!("sni={sni}"));
        }
        if let Some(ref host) = t.host_header {
            q.push(format!("host={host}"));
        }
        if let Some(ref path) = t.path {
            q.push(format!("path={}", quote_component(path)));
        }
        if let Some(flow) = self.credentials.get("flow") {
            q.push(format!("flow={flow}"));
        }
        uri.push('?');
        uri.push_str(&q.join("&"));
        append_fragment(&mut uri, &self.display_name);
        uri
    }

    fn serialize_trojan(&self) -> String {
        let t = &self.transport;
        let mut uri = format!(
            "trojan://{}@{}:{}",
            quote_component(self.cred("password")),
            self.host_for_uri(),
            self.port
        );
        let mut q: Vec<String> = vec![format!("security={}", if t.tls { "tls" } else { "none" })];
        if let Some(ref sni) = t.sni {
            q.push(format!("sni={sni}"));
        }
        q.push(format!("type={}", t.network.as_str()));
        if let Some(ref host) = t.host_header {
            q.push(format!("host={host}"));
        }
        if let Some(ref path) = t.path {
            q.push(format!("path={}", quote_component(path)));
        }
        uri.push('?');
        uri.push_str(&q.join("&"));
        append_fragment(&mut uri, &self.display_name);
        uri
    }

    // 统一输出 base64(method:password) 规范形式
    fn serialize_ss(&self) -> String {
        let auth = STANDARD.encode(format!("{}:{}", self.cred("method"), self.cred("password")));
        let mut uri = format!("ss://{}@{}:{}", auth, self.host_for_uri(), self.port);
        append_fragment(&mut uri, &self.display_name);
        uri
    }

    fn serialize_hysteria2(&self) -> String {
        let t = &self.transport;
        let mut uri = format!(
            "hysteria2://{}@{}:{}",
            quote_component(self.cred("password")),
            self.host_for_uri(),
            self.port
        );
        let mut q: Vec<String> = Vec::new();
        if let Some(ref sni) = t.sni {
            q.push(format!("sni={sni}"));
        }
        if let Some(insecure) = self.credentials.get("insecure") {
            q.push(format!("insecure={insecure}"));
        }
        if let Some(obfs) = self.credentials.get("obfs") {
            q.push(format!("obfs={obfs}"));
        }
        if let Some(op) = self.credentials.get("obfs-password") {
            q.push(format!("obfs-password={}", quote_component(op)));
        }
        if !q.is_empty() {
            uri.push('?');
            uri.push_str(&q.join("&"));
        }
        append_fragment(&mut uri, &self.display_name);
        uri
    }

    /// Clash `proxies:` entry for this node.
    pub fn to_clash(&self) -> Yamlv {
        let t = &self.transport;
        let mut m: Value = match self.kind {
            Kind::Vmess => json!({
                "name": self.display_name,
                "type": "vmess",
                "server": self.server,
                "port": self.port,
                "uuid": self.cred("uuid"),
                "alterId": self.credentials.get("aid")
                    .and_then(|s| s.parse::<u64>().ok()).unwrap_or(0),
                "cipher": self.credentials.get("scy").map_or("auto", |s| s.as_str()),
                "udp": true,
                "network": t.network.as_str(),
                "tls": t.tls,
                "skip-cert-verify": true,
            }),
            Kind::Vless => json!({
                "name": self.display_name,
                "type": "vless",
                "server": self.server,
                "port": self.port,
                "uuid": self.cred("uuid"),
                "udp": true,
                "network": t.network.as_str(),
                "tls": t.tls,
                "skip-cert-verify": true,
            }),
            Kind::Trojan => json!({
                "name": self.display_name,
                "type": "trojan",
                "server": self.server,
                "port": self.port,
                "password": self.cred("password"),
                "udp": true,
                "skip-cert-verify": true,
            }),
            Kind::Shadowsocks => json!({
                "name": self.display_name,
                "type": "ss",
                "server": self.server,
                "port": self.port,
                "cipher": self.cred("method"),
                "password": self.cred("password"),
                "udp": true,
            }),
            Kind::Hysteria2 => json!({
                "name": self.display_name,
                "type": "hysteria2",
                "server": self.server,
                "port": self.port,
                "password": self.cred("password"),
                "skip-cert-verify": true,
            }),
        };
        if let Some(ref sni) = t.sni {
            m["sni"] = json!(sni);
        }
        if t.network == Network::Ws {
            m["ws-opts"] = json!({
                "path": t.path.as_deref().unwrap_or("/"),
                "headers": { "Host": t.host_header.as_deref().unwrap_or("") },
            });
        }
        if t.network == Network::Grpc {
            m["grpc-opts"] = json!({
                "grpc-service-name": t.path.as_deref().unwrap_or(""),
            });
        }
        serde_yaml::to_value(m).unwrap_or(Yamlv::Null)
    }
}

fn append_fragment(uri: &mut String, name: &str) {
    if !name.is_empty() {
        uri.push('#');
        uri.push_str(&quote_component(name));
    }
}

fn quote_component(s: &str) -> String {
    urlparse::quote(s, b"/").unwrap_or_else(|_| s.to_string())
}

impl Display for ProxyNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let scheme = self.kind.scheme();
        write!(f, "<N {}:{}:{}>", &scheme[..2], self.server, self.port)
    }
}

impl Eq for ProxyNode {}

// display_name不参与身份判定，同一节点换个别名仍视为重复
impl PartialEq for ProxyNode {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.server == other.server
            && self.port == other.port
            && self.credentials == other.credentials
            && self.transport == other.transport
    }
}

impl Hash for ProxyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.server.hash(state);
        self.port.hash(state);
        self.credentials.hash(state);
        self.transport.hash(state);
    }
}

/// A node together with where it came from; the pipeline moves these
/// between stages while the canonical `ProxyNode` stays pure.
#[derive(Debug, Clone)]
pub struct Sourced {
    pub node: ProxyNode,
    pub source: String,
    pub raw: String,
    pub real_ip: String,
}

impl Sourced {
    pub fn new(node: ProxyNode, source: &str, raw: &str) -> Sourced {
        Sourced {
            node,
            source: String::from(source),
            raw: String::from(raw),
            real_ip: String::new(),
        }
    }
}

impl Display for Sourced {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vless_sample() -> ProxyNode {
        let mut n = ProxyNode::new(Kind::Vless);
        n.server = String::from("example.com");
        n.port = 443;
        n.credentials.insert(
            String::from("uuid"),
            String::from("11111111-2222-3333-4444-555555555555"),
        );
        n.transport.network = Network::Ws;
        n.transport.tls = true;
        n.transport.sni = Some(String::from("example.com"));
        n.transport.path = Some(String::from("/ws"));
        n.display_name = String::from("node-a");
        n
    }

    #[test]
    fn port_range_is_enforced() {
        assert_eq!(ProxyNode::check_port(0), Err(ParseError::InvalidPort(0)));
        assert_eq!(ProxyNode::check_port(70000), Err(ParseError::InvalidPort(70000)));
        assert_eq!(ProxyNode::check_port(443), Ok(443));
    }

    #[test]
    fn validated_requires_kind_specific_credentials() {
        let mut n = vless_sample();
        n.credentials.clear();
        assert_eq!(n.validated().unwrap_err(), ParseError::MissingField("uuid"));

        let mut t = ProxyNode::new(Kind::Trojan);
        t.server = String::from("h.example");
        t.port = 8443;
        assert_eq!(t.validated().unwrap_err(), ParseError::MissingField("password"));

        let mut s = ProxyNode::new(Kind::Shadowsocks);
        s.server = String::from("h.example");
        s.port = 8388;
        s.credentials.insert(String::from("method"), String::from("aes-256-gcm"));
        assert_eq!(s.validated().unwrap_err(), ParseError::MissingField("password"));
    }

    #[test]
    fn validated_rejects_empty_server() {
        let mut n = vless_sample();
        n.server = String::new();
        assert_eq!(n.validated().unwrap_err(), ParseError::MissingField("server"));
    }

    #[test]
    fn identity_ignores_display_name() {
        let a = vless_sample();
        let mut b = vless_sample();
        b.display_name = String::from("renamed");
        assert_eq!(a, b);

        let mut c = vless_sample();
        c.port = 8443;
        assert_ne!(a, c);
    }

    #[test]
    fn clash_ws_entry_carries_transport() {
        let y = vless_sample().to_clash();
        assert_eq!(y.get("type").and_then(|v| v.as_str()), Some("vless"));
        assert_eq!(y.get("port").and_then(|v| v.as_u64()), Some(443));
        let ws = y.get("ws-opts").expect("ws-opts");
        assert_eq!(ws.get("path").and_then(|v| v.as_str()), Some("/ws"));
    }

    #[test]
    fn ipv6_server_gets_brackets() {
        let mut n = vless_sample();
        n.server = String::from("2001:db8::1");
        assert!(n.serialize_vless().contains("@[2001:db8::1]:443"));
    }
}
