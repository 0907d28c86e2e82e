use std::collections::HashMap;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use regex::Regex;
use serde_json::Value;
use serde_yaml::Value as Yamlv;
use url::Url;
use urlparse::{unquote, unquote_plus};

use crate::error::ParseError;
use crate::node::{Kind, Network, ProxyNode, Sourced};
use crate::tools;
use crate::tools::b64d;

/// Parses one raw node: a scheme-prefixed URI (`vmess://`, `vless://`,
/// `trojan://`, `ss://`, `hysteria2://`) or a single Clash-style mapping.
pub fn parse(raw: &str) -> Result<ProxyNode, ParseError> {
    let mut data = raw.trim().to_string();
    if data.is_empty() {
        return Err(ParseError::UnknownScheme(String::new()));
    }
    // 网页里抠出来的链接常带htmlentity
    if data.contains("&amp;") {
        data = data.replace("&amp;", "&");
    }

    if let Some(idx) = data.find("://") {
        let scheme = data[..idx].to_ascii_lowercase();
        return match Kind::from_scheme(scheme.as_str()) {
            Some(Kind::Vmess) => parse_vmess(&data),
            Some(Kind::Shadowsocks) => parse_ss(&data),
            Some(kind) => parse_authority(kind, &data),
            None => Err(ParseError::UnknownScheme(scheme)),
        };
    }

    // 无scheme时试着当成单个clash条目
    if let Ok(v) = serde_yaml::from_str::<Yamlv>(&data) {
        if v.get("type").is_some() {
            return from_clash_entry(&v);
        }
    }
    Err(ParseError::UnknownScheme(head_of(&data)))
}

fn head_of(s: &str) -> String {
    s.chars().take(16).collect()
}

/// Alias for the `serialize` operation; the real work lives on the node.
pub fn serialize(node: &ProxyNode) -> String {
    node.serialize()
}

// vmess:// 后面是base64(json)，可能还挂着 #alias
fn parse_vmess(data: &str) -> Result<ProxyNode, ParseError> {
    let body = &data[8..];
    let (payload, frag) = match body.split_once('#') {
        Some((p, f)) => (p, f),
        None => (body, ""),
    };
    let json_str = b64d(payload, "vmess", false).ok_or(ParseError::MalformedBase64)?;
    let x: Value = serde_json::from_str(json_str.as_str())
        .map_err(|e| ParseError::MalformedUri(format!("vmess payload is not json: {e}")))?;

    let mut node = ProxyNode::new(Kind::Vmess);
    node.server = String::from(x["add"].as_str().unwrap_or_default());

    // 端口有的站写字符串有的写数字
    let port_raw: u32 = match x["port"].as_str() {
        Some(s) => s.parse().unwrap_or(0),
        None => x["port"].as_u64().unwrap_or(0) as u32,
    };
    node.port = ProxyNode::check_port(port_raw)?;

    let uuid = String::from(x["id"].as_str().unwrap_or_default());
    if uuid.is_empty() {
        return Err(ParseError::MissingField("uuid"));
    }
    node.credentials.insert(String::from("uuid"), uuid);

    // 默认值不落库，否则serialize后parse会多出字段
    let aid = match x.get("aid") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if !aid.is_empty() && aid != "0" {
        node.credentials.insert(String::from("aid"), aid);
    }
    let scy = String::from(x.get("scy").and_then(|v| v.as_str()).unwrap_or_default());
    if !scy.is_empty() && scy != "auto" {
        node.credentials.insert(String::from("scy"), scy);
    }

    node.transport.network =
        Network::from_str_lossy(x.get("net").and_then(|v| v.as_str()).unwrap_or("tcp"));
    node.transport.tls = match x.get("tls") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "tls",
        _ => false,
    };
    node.transport.path = non_empty(x.get("path").and_then(|v| v.as_str()).unwrap_or_default());
    node.transport.host_header =
        non_empty(x.get("host").and_then(|v| v.as_str()).unwrap_or_default());
    node.transport.sni = non_empty(x.get("sni").and_then(|v| v.as_str()).unwrap_or_default());

    let alias = match x.get("ps").and_then(|v| v.as_str()) {
        Some(ps) if !ps.is_empty() => String::from(ps),
        _ => unquote_plus(frag).unwrap_or_default(),
    };
    node.display_name = tools::adjust_alias(alias);

    node.validated()
}

// <credential>@<server>:<port>?<query>#<alias> 形式：vless/trojan/hysteria2
fn parse_authority(kind: Kind, data: &str) -> Result<ProxyNode, ParseError> {
    let p = Url::parse(data).map_err(|e| match e {
        url::ParseError::InvalidPort => ParseError::InvalidPort(oversize_port(data)),
        _ => ParseError::MalformedUri(e.to_string()),
    })?;

    let mut node = ProxyNode::new(kind);
    node.server = strip_brackets(p.host_str().unwrap_or_default());
    if node.server.is_empty() {
        return Err(ParseError::MissingField("server"));
    }
    let port = p.port().ok_or(ParseError::MissingField("port"))?;
    node.port = ProxyNode::check_port(port as u32)?;

    let mut param: HashMap<String, String> = HashMap::new();
    for _item in p.query_pairs() {
        param.insert(_item.0.to_string(), _item.1.to_string());
    }

    // '+'在密码里是合法字符，这里不能用unquote_plus
    let credential = unquote(p.username()).unwrap_or_default();
    if credential.is_empty() {
        return Err(ParseError::MissingField(match kind {
            Kind::Vless => "uuid",
            _ => "password",
        }));
    }

    match kind {
        Kind::Vless => {
            node.credentials.insert(String::from("uuid"), credential);
            if let Some(flow) = param.get("flow") {
                if !flow.is_empty() {
                    node.credentials.insert(String::from("flow"), flow.clone());
                }
            }
            node.transport.network =
                Network::from_str_lossy(param.get("type").map_or("tcp", |s| s.as_str()));
            let security = param.get("security").map_or("none", |s| s.as_str());
            node.transport.tls = security == "tls" || security == "reality";
        }
        Kind::Trojan => {
            node.credentials.insert(String::from("password"), credential);
            node.transport.network =
                Network::from_str_lossy(param.get("type").map_or("tcp", |s| s.as_str()));
            // trojan本身就跑在tls上，没写security的按tls算
            node.transport.tls = param.get("security").map_or(true, |s| s != "none");
        }
        Kind::Hysteria2 => {
            node.credentials.insert(String::from("password"), credential);
            node.transport.tls = true;
            for key in ["insecure", "obfs", "obfs-password"] {
                if let Some(v) = param.get(key) {
                    if !v.is_empty() {
                        node.credentials.insert(String::from(key), v.clone());
                    }
                }
            }
        }
        _ => {}
    }

    node.transport.sni = param
        .get("sni")
        .or_else(|| param.get("peer"))
        .and_then(|s| non_empty(s));
    if node.transport.network == Network::Grpc {
        node.transport.path = param
            .get("serviceName")
            .or_else(|| param.get("path"))
            .and_then(|s| non_empty(s));
    } else {
        node.transport.path = param.get("path").and_then(|s| non_empty(s));
    }
    node.transport.host_header = param.get("host").and_then(|s| non_empty(s));

    node.display_name =
        tools::adjust_alias(unquote_plus(p.fragment().unwrap_or_default()).unwrap_or_default());

    node.validated()
}

// ss:// 的编码方式野路子最多，按约定顺序逐个试，第一个解出合法值的算数：
//   (a) 明文 method:password 或纯密码
//   (b) base64(json{method,password})
//   (c) base64(method:password)
//   (d) 整段base64，method:password@server:port 或 server:port:method:password
fn parse_ss(data: &str) -> Result<ProxyNode, ParseError> {
    let body = &data[5..];
    let (body, frag) = match body.split_once('#') {
        Some((b, f)) => (b, f),
        None => (body, ""),
    };
    // plugin等query参数不进入规范形式
    let body = match body.split_once('?') {
        Some((b, _)) => b,
        None => body,
    };

    let mut node = ProxyNode::new(Kind::Shadowsocks);
    node.display_name =
        tools::adjust_alias(unquote_plus(frag).unwrap_or_default());

    if let Some((user, hostport)) = body.rsplit_once('@') {
        let (server, port) = split_host_port(hostport)?;
        node.server = server;
        node.port = port;

        let user = unquote(user).unwrap_or_else(|_| String::from(user));
        let (method, password) = decode_ss_userinfo(&user)?;
        let (method, password) = repair_ss_auth(method, password);
        node.credentials.insert(String::from("method"), method);
        node.credentials.insert(String::from("password"), password);
        return node.validated();
    }

    // (d) 整段base64的遗留形式
    let dec = b64d(body, "ss", false).ok_or(ParseError::MalformedBase64)?;
    let re = Regex::new(":|@").unwrap();
    let parts: Vec<&str> = re.splitn(dec.as_str(), 4).collect();
    if parts.len() != 4 {
        return Err(ParseError::MalformedUri(format!("ss legacy form: {}", head_of(&dec))));
    }
    let (method, password, server, port_s) = if parts[1].parse::<u32>().is_ok() {
        // server:port:method:password
        (parts[2], parts[3], parts[0], parts[1])
    } else {
        // method:password@server:port
        (parts[0], parts[1], parts[2], parts[3])
    };
    node.server = String::from(server);
    node.port = ProxyNode::check_port(port_s.parse().unwrap_or(0))?;
    let (method, password) = repair_ss_auth(String::from(method), String::from(password));
    node.credentials.insert(String::from("method"), method);
    node.credentials.insert(String::from("password"), password);
    node.validated()
}

fn decode_ss_userinfo(user: &str) -> Result<(String, String), ParseError> {
    // (a) 明文 method:password
    if let Some((m, p)) = user.split_once(':') {
        return Ok((String::from(m), String::from(p)));
    }
    if let Some(dec) = b64d(user, "ss-userinfo", false) {
        // (b) base64后的json
        if let Ok(v) = serde_json::from_str::<Value>(dec.as_str()) {
            if v.is_object() {
                let m = String::from(v.get("method").and_then(|o| o.as_str()).unwrap_or_default());
                let p =
                    String::from(v.get("password").and_then(|o| o.as_str()).unwrap_or_default());
                if !p.is_empty() {
                    return Ok((m, p));
                }
            }
        }
        // (c) base64后的 method:password
        if let Some((m, p)) = dec.split_once(':') {
            return Ok((String::from(m), String::from(p)));
        }
        return Ok((String::new(), dec));
    }
    if user.is_empty() {
        return Err(ParseError::MissingField("password"));
    }
    // ss2022风格的裸密码
    Ok((String::new(), String::from(user)))
}

// 方法密码只有其一时的修补：有方法无密码认为方法字段存的是密码；
// 有密码无方法按密码长度挑一个默认加密方法
fn repair_ss_auth(method: String, password: String) -> (String, String) {
    if !method.is_empty() && password.is_empty() {
        (String::from("aes-256-gcm"), method)
    } else if method.is_empty() && !password.is_empty() {
        if password.len() <= 16 {
            (String::from("aes-256-cfb"), password)
        } else {
            (String::from("aes-256-gcm"), password)
        }
    } else {
        (method, password)
    }
}

fn split_host_port(hostport: &str) -> Result<(String, u16), ParseError> {
    if let Some(rest) = hostport.strip_prefix('[') {
        // ipv6
        let Some((host, rest)) = rest.split_once(']') else {
            return Err(ParseError::MalformedUri(String::from(hostport)));
        };
        let port_s = rest.strip_prefix(':').ok_or(ParseError::MissingField("port"))?;
        let port = ProxyNode::check_port(port_s.parse().unwrap_or(0))?;
        return Ok((String::from(host), port));
    }
    let Some((host, port_s)) = hostport.rsplit_once(':') else {
        return Err(ParseError::MissingField("port"));
    };
    if host.is_empty() {
        return Err(ParseError::MissingField("server"));
    }
    let port = ProxyNode::check_port(port_s.parse().unwrap_or(0))?;
    Ok((String::from(host), port))
}

// Url::parse对超范围端口只报InvalidPort不带数值，这里自己抠出来
fn oversize_port(data: &str) -> u32 {
    let body = match data.find("://") {
        Some(i) => &data[i + 3..],
        None => data,
    };
    let end = body.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(body.len());
    body[..end]
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse().ok())
        .unwrap_or(0)
}

fn strip_brackets(host: &str) -> String {
    if host.starts_with('[') && host.ends_with(']') {
        String::from(&host[1..host.len() - 1])
    } else {
        String::from(host)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(String::from(s))
    }
}

fn yaml_str(v: &Yamlv, key: &str) -> String {
    String::from(v.get(key).and_then(|o| o.as_str()).unwrap_or_default())
}

/// One Clash proxy mapping (unprefixed keys) into the canonical form.
pub fn from_clash_entry(v: &Yamlv) -> Result<ProxyNode, ParseError> {
    let type_s = yaml_str(v, "type");
    let kind = match type_s.as_str() {
        "vmess" => Kind::Vmess,
        "vless" => Kind::Vless,
        "trojan" => Kind::Trojan,
        "ss" => Kind::Shadowsocks,
        "hysteria2" | "hy2" => Kind::Hysteria2,
        other => return Err(ParseError::UnknownScheme(String::from(other))),
    };

    let mut node = ProxyNode::new(kind);
    node.server = yaml_str(v, "server");
    let port_raw: u32 = match v.get("port") {
        Some(Yamlv::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Yamlv::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    node.port = ProxyNode::check_port(port_raw)?;
    node.display_name = tools::adjust_alias(yaml_str(v, "name"));

    match kind {
        Kind::Vmess => {
            node.credentials.insert(String::from("uuid"), yaml_str(v, "uuid"));
            let aid = v.get("alterId").and_then(|o| o.as_u64()).unwrap_or(0);
            if aid != 0 {
                node.credentials.insert(String::from("aid"), aid.to_string());
            }
            let cipher = yaml_str(v, "cipher");
            if !cipher.is_empty() && cipher != "auto" {
                node.credentials.insert(String::from("scy"), cipher);
            }
            node.transport.tls = v.get("tls").and_then(|o| o.as_bool()).unwrap_or(false);
        }
        Kind::Vless => {
            node.credentials.insert(String::from("uuid"), yaml_str(v, "uuid"));
            let flow = yaml_str(v, "flow");
            if !flow.is_empty() {
                node.credentials.insert(String::from("flow"), flow);
            }
            node.transport.tls = v.get("tls").and_then(|o| o.as_bool()).unwrap_or(false);
        }
        Kind::Trojan => {
            node.credentials.insert(String::from("password"), yaml_str(v, "password"));
            node.transport.tls = true;
        }
        Kind::Shadowsocks => {
            node.credentials.insert(String::from("method"), yaml_str(v, "cipher"));
            node.credentials.insert(String::from("password"), yaml_str(v, "password"));
        }
        Kind::Hysteria2 => {
            node.credentials.insert(String::from("password"), yaml_str(v, "password"));
            node.transport.tls = true;
        }
    }

    node.transport.network = Network::from_str_lossy(yaml_str(v, "network").as_str());
    node.transport.sni = non_empty(yaml_str(v, "sni").as_str())
        .or_else(|| non_empty(yaml_str(v, "servername").as_str()));

    if let Some(ws) = v.get("ws-opts") {
        node.transport.network = Network::Ws;
        node.transport.path = non_empty(yaml_str(ws, "path").as_str());
        if let Some(headers) = ws.get("headers") {
            node.transport.host_header = non_empty(yaml_str(headers, "Host").as_str())
                .or_else(|| non_empty(yaml_str(headers, "host").as_str()));
        }
    }
    if let Some(grpc) = v.get("grpc-opts") {
        node.transport.network = Network::Grpc;
        node.transport.path = non_empty(yaml_str(grpc, "grpc-service-name").as_str());
    }

    node.validated()
}

/// The `proxies:` list of a Clash document; bad entries are skipped.
pub fn parse_clash_list(s: &str) -> Vec<ProxyNode> {
    let yaml_data: HashMap<String, Yamlv> = serde_yaml::from_str(s).unwrap_or_default();
    let l_proxy: Vec<Yamlv> = match yaml_data.get("proxies") {
        Some(Yamlv::Sequence(seq)) => seq.clone(),
        _ => Vec::new(),
    };
    let mut out = Vec::new();
    for _proxy in &l_proxy {
        match from_clash_entry(_proxy) {
            Ok(node) => out.push(node),
            Err(e) => {
                trace!("skip clash entry: {e}");
            }
        }
    }
    out
}

/// Emits a minimal Clash document holding the given nodes.
pub fn to_clash_document(nodes: &[&ProxyNode]) -> String {
    let proxies: Vec<Yamlv> = nodes.iter().map(|n| n.to_clash()).collect();
    let mut doc = serde_yaml::Mapping::new();
    doc.insert(Yamlv::String(String::from("proxies")), Yamlv::Sequence(proxies));
    serde_yaml::to_string(&doc).unwrap_or_default()
}

// 从html/markdown等杂货文本里抠出节点链接
pub fn extract_uris(text: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)(?:vmess|vless|trojan|ss|hysteria2|hy2)://[^\s<>"'\\]+"#).unwrap();
    re.find_iter(text).map(|m| String::from(m.as_str())).collect()
}

/// Subscription-content cascade: Clash YAML, then whole-payload Base64,
/// then line-per-URI text, then a regex sweep over raw markup.
pub fn data2nodes(worker_name: &str, data: &str, url: &str) -> Vec<Sourced> {
    let mut out: Vec<Sourced> = Vec::new();

    if url.ends_with(".yaml") || url.ends_with(".yml") || looks_like_clash(data) {
        for node in parse_clash_list(data) {
            let raw = node.serialize();
            out.push(Sourced::new(node, url, raw.as_str()));
        }
        if !out.is_empty() {
            trace!("{worker_name} clash document, {} node(s), url={url}", out.len());
            return out;
        }
    }

    let l_data: Vec<String> = match b64d(data, url, false) {
        Some(raw_s) => raw_s
            .lines()
            .map(|c| c.to_string())
            .filter(|x| !x.trim().is_empty())
            .collect(),
        None => data
            .lines()
            .map(|c| c.to_string())
            .filter(|x| !x.trim().is_empty())
            .collect(),
    };

    for _data in &l_data {
        match parse(_data) {
            Ok(node) => out.push(Sourced::new(node, url, _data)),
            Err(e) => {
                trace!("{worker_name} skip line ({e}), url={url}");
            }
        }
    }

    if out.is_empty() {
        // 文章页等非订阅内容，直接正则扫
        for uri in extract_uris(data) {
            match parse(uri.as_str()) {
                Ok(node) => out.push(Sourced::new(node, url, uri.as_str())),
                Err(e) => {
                    trace!("{worker_name} skip extracted uri ({e}), url={url}");
                }
            }
        }
    }

    out
}

fn looks_like_clash(data: &str) -> bool {
    data.starts_with("proxies:") || data.contains("\nproxies:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TransportOpts;
    use crate::tools::b64e;
    use std::collections::BTreeMap;

    fn creds(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (String::from(*k), String::from(*v)))
            .collect()
    }

    fn sample(kind: Kind, pairs: &[(&str, &str)]) -> ProxyNode {
        let mut n = ProxyNode::new(kind);
        n.server = String::from("node.example.com");
        n.port = 443;
        n.credentials = creds(pairs);
        n.display_name = String::from("unit-node");
        n
    }

    #[test]
    fn round_trip_vmess() {
        let mut n = sample(Kind::Vmess, &[("uuid", "3f1a8a6e-9f30-4b1f-9d0e-aaaaaaaaaaaa")]);
        n.transport = TransportOpts {
            network: Network::Ws,
            tls: true,
            sni: Some(String::from("cdn.example.com")),
            path: Some(String::from("/vm")),
            host_header: Some(String::from("cdn.example.com")),
        };
        let uri = n.serialize();
        assert!(uri.starts_with("vmess://"));
        let back = parse(uri.as_str()).unwrap();
        assert_eq!(back, n);
        assert_eq!(back.display_name, n.display_name);
    }

    #[test]
    fn round_trip_vless() {
        let mut n = sample(
            Kind::Vless,
            &[("uuid", "3f1a8a6e-9f30-4b1f-9d0e-bbbbbbbbbbbb"), ("flow", "xtls-rprx-vision")],
        );
        n.transport.tls = true;
        n.transport.sni = Some(String::from("sni.example.com"));
        let back = parse(n.serialize().as_str()).unwrap();
        assert_eq!(back, n);
        assert_eq!(back.display_name, n.display_name);
    }

    #[test]
    fn round_trip_trojan() {
        let mut n = sample(Kind::Trojan, &[("password", "p4ss-w0rd")]);
        n.transport.tls = true;
        n.transport.network = Network::Ws;
        n.transport.path = Some(String::from("/t"));
        let back = parse(n.serialize().as_str()).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn round_trip_hysteria2() {
        let mut n = sample(
            Kind::Hysteria2,
            &[("password", "letmein"), ("obfs", "salamander"), ("obfs-password", "ob")],
        );
        n.transport.tls = true;
        let back = parse(n.serialize().as_str()).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn round_trip_canonical_ss() {
        let mut n = sample(Kind::Shadowsocks, &[("method", "aes-256-gcm"), ("password", "secret")]);
        n.port = 8388;
        let back = parse(n.serialize().as_str()).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn parse_vmess_accepts_numeric_port_and_ps() {
        let payload = serde_json::json!({
            "v": "2", "ps": "hk 01", "add": "1.2.3.4", "port": 8080,
            "id": "3f1a8a6e-9f30-4b1f-9d0e-cccccccccccc",
            "aid": 0, "net": "tcp", "tls": ""
        });
        let uri = format!("vmess://{}", b64e(payload.to_string().as_str()));
        let n = parse(uri.as_str()).unwrap();
        assert_eq!(n.server, "1.2.3.4");
        assert_eq!(n.port, 8080);
        assert_eq!(n.display_name, "hk01"); // blanks stripped
        assert!(!n.transport.tls);
    }

    #[test]
    fn parse_vless_reality_maps_to_tls() {
        let uri = "vless://3f1a8a6e-9f30-4b1f-9d0e-dddddddddddd@9.9.9.9:443?type=grpc&security=reality&sni=x.example&serviceName=svc#name%20x";
        let n = parse(uri).unwrap();
        assert!(n.transport.tls);
        assert_eq!(n.transport.network, Network::Grpc);
        assert_eq!(n.transport.path.as_deref(), Some("svc"));
        assert_eq!(n.display_name, "namex");
    }

    #[test]
    fn parse_vless_ipv6_host() {
        let uri = "vless://3f1a8a6e-9f30-4b1f-9d0e-eeeeeeeeeeee@[2001:db8::2]:443?type=tcp&security=none";
        let n = parse(uri).unwrap();
        assert_eq!(n.server, "2001:db8::2");
    }

    #[test]
    fn ss_plain_userinfo() {
        let n = parse("ss://chacha20-ietf-poly1305:pw@5.6.7.8:8388#a").unwrap();
        assert_eq!(n.credentials.get("method").map(String::as_str), Some("chacha20-ietf-poly1305"));
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("pw"));
    }

    #[test]
    fn ss_base64_userinfo() {
        let uri = format!("ss://{}@5.6.7.8:8388", b64e("aes-128-gcm:topsecret"));
        let n = parse(uri.as_str()).unwrap();
        assert_eq!(n.credentials.get("method").map(String::as_str), Some("aes-128-gcm"));
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("topsecret"));
    }

    #[test]
    fn ss_base64_json_userinfo() {
        let uri = format!(
            "ss://{}@5.6.7.8:8388",
            b64e(r#"{"method":"aes-256-gcm","password":"jpw"}"#)
        );
        let n = parse(uri.as_str()).unwrap();
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("jpw"));
    }

    #[test]
    fn ss_legacy_whole_payload() {
        let uri = format!("ss://{}", b64e("aes-256-cfb:oldpw@9.8.7.6:8389"));
        let n = parse(uri.as_str()).unwrap();
        assert_eq!(n.server, "9.8.7.6");
        assert_eq!(n.port, 8389);
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("oldpw"));
    }

    #[test]
    fn hy2_alias_round_trips() {
        let n = parse("hy2://letmein@1.2.3.4:443?sni=x.example#a").unwrap();
        assert_eq!(n.kind, Kind::Hysteria2);
        assert_eq!(n.transport.sni.as_deref(), Some("x.example"));
        let uri = n.serialize();
        assert!(uri.starts_with("hysteria2://"));
        assert_eq!(parse(uri.as_str()).unwrap(), n);
    }

    #[test]
    fn ss_method_only_userinfo_is_repaired() {
        let uri = format!("ss://{}@5.6.7.8:8388", b64e("aes-128-gcm:"));
        let n = parse(uri.as_str()).unwrap();
        assert_eq!(n.credentials.get("method").map(String::as_str), Some("aes-256-gcm"));
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("aes-128-gcm"));
    }

    #[test]
    fn ss_bare_password_gets_default_method() {
        let n = parse("ss://justapassword@1.1.1.1:8388").unwrap();
        assert_eq!(n.credentials.get("method").map(String::as_str), Some("aes-256-cfb"));
        assert_eq!(n.credentials.get("password").map(String::as_str), Some("justapassword"));
    }

    #[test]
    fn rejects_empty_and_unknown_scheme() {
        assert_eq!(parse(""), Err(ParseError::UnknownScheme(String::new())));
        assert!(matches!(parse("ssr://abcdef"), Err(ParseError::UnknownScheme(_))));
        assert!(matches!(parse("socks5://1.2.3.4:1080"), Err(ParseError::UnknownScheme(_))));
    }

    #[test]
    fn rejects_missing_port_and_bad_base64() {
        assert_eq!(
            parse("vless://3f1a8a6e-9f30-4b1f-9d0e-ffffffffffff@host.example?type=tcp"),
            Err(ParseError::MissingField("port"))
        );
        assert_eq!(parse("vmess://%%%%"), Err(ParseError::MalformedBase64));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert_eq!(
            parse("trojan://pw@1.2.3.4:0?security=tls"),
            Err(ParseError::InvalidPort(0))
        );
        let uri = format!("ss://{}", b64e("aes-256-gcm:pw@1.2.3.4:70000"));
        assert_eq!(parse(uri.as_str()), Err(ParseError::InvalidPort(70000)));
        assert_eq!(
            parse("vless://3f1a8a6e-9f30-4b1f-9d0e-ffffffffffff@1.2.3.4:70000?type=tcp&security=none"),
            Err(ParseError::InvalidPort(70000))
        );
    }

    #[test]
    fn clash_list_parses_and_skips_bad_entries() {
        let doc = r#"
proxies:
  - name: "ok-vmess"
    type: vmess
    server: 1.2.3.4
    port: 443
    uuid: 3f1a8a6e-9f30-4b1f-9d0e-111111111111
    alterId: 0
    cipher: auto
    tls: true
    network: ws
    ws-opts:
      path: /ws
      headers:
        Host: cdn.example.com
  - name: "bad-port"
    type: trojan
    server: 1.2.3.4
    port: 0
    password: pw
  - name: "ok-ss"
    type: ss
    server: 5.6.7.8
    port: 8388
    cipher: aes-256-gcm
    password: pw
"#;
        let nodes = parse_clash_list(doc);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, Kind::Vmess);
        assert_eq!(nodes[0].transport.network, Network::Ws);
        assert_eq!(nodes[0].transport.host_header.as_deref(), Some("cdn.example.com"));
        assert_eq!(nodes[1].kind, Kind::Shadowsocks);
    }

    #[test]
    fn clash_entry_via_parse() {
        let n = parse("{type: trojan, server: 1.2.3.4, port: 443, password: pw, name: t1}").unwrap();
        assert_eq!(n.kind, Kind::Trojan);
        assert!(n.transport.tls);
    }

    #[test]
    fn data2nodes_base64_subscription() {
        let lines = "trojan://pw@1.2.3.4:443?security=tls#a\nvless://3f1a8a6e-9f30-4b1f-9d0e-222222222222@5.6.7.8:443?type=tcp&security=none#b\nnot-a-node\n";
        let payload = b64e(lines);
        let got = data2nodes("[test]", payload.as_str(), "http://sub.example/x.txt");
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].node.kind, Kind::Trojan);
        assert_eq!(got[1].node.kind, Kind::Vless);
        assert_eq!(got[0].source, "http://sub.example/x.txt");
    }

    #[test]
    fn data2nodes_sweeps_html() {
        let html = r#"<html><body><p>today:</p>
<code>trojan://pw@1.2.3.4:443?security=tls&amp;sni=x.example#hk</code>
</body></html>"#;
        let got = data2nodes("[test]", html, "http://blog.example/post");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].node.transport.sni.as_deref(), Some("x.example"));
    }

    #[test]
    fn clash_document_round_trip() {
        let n = sample(Kind::Shadowsocks, &[("method", "aes-256-gcm"), ("password", "pw")]);
        let doc = to_clash_document(&[&n]);
        let back = parse_clash_list(doc.as_str());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0], n);
    }
}
