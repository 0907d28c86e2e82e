mod collect;
mod conf;
mod error;
mod node;
mod proto;
mod publish;
mod tools;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::error::Error as StdError;
use std::hash::{Hash, Hasher};
use std::io::Write as io_write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_channel::{bounded, Receiver, Sender};
use chrono::Local;
use clap::{value_parser, Arg, Command};
use dnsclientx::DNSClient;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::LevelFilter;
use log::{debug, error, info, trace, warn};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::timeout;

use conf::Config;
use node::{ProxyNode, Sourced};

type MyResult<T> = result::Result<T, Box<dyn StdError>>;

#[tokio::main]
async fn main() {
    let matches = Command::new("node_harvest")
        .version("0.1")
        .about("collect free proxy nodes, normalize, probe and republish")
        .arg(Arg::new("config_file")
            .short('c')
            .long("conf_file")
            .required(true)
            .help("specify a conf file path"))
        .arg(Arg::new("input")
            .short('i')
            .long("input")
            .num_args(1)
            .help("parse a local node list file in addition to scraping"))
        .arg(Arg::new("skip_probe")
            .short('s')
            .long("skip_probe")
            .default_value("false")
            .default_missing_value("true")
            .value_parser(value_parser!(bool))
            .num_args(0..=1)
            .help("keep every unique node without tcp probing"))
        .arg(Arg::new("no_publish")
            .short('n')
            .long("no_publish")
            .default_value("false")
            .default_missing_value("true")
            .value_parser(value_parser!(bool))
            .num_args(0..=1)
            .help("write result files but never git commit/push"))
        .arg(Arg::new("log_level")
            .short('d')
            .long("log_level")
            .default_value("info")
            .default_missing_value("info")
            .value_parser(clap::builder::PossibleValuesParser::new(["trace", "debug", "info", "error"]))
            .num_args(0..=1)
            .help("set debug log output level"))
        .get_matches();

    let mut lb = env_logger::Builder::new();
    lb.format(|buf, record| {
            let tim = Local::now().format("%Y-%m-%d_%H:%M:%S");
            writeln!(
                buf,
                "{tim}|{:.1}|{}|{}:{}",
                record.level(),
                record.module_path_static().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.args()
            )
        })
        .filter_module("reqwest", LevelFilter::Info)
        .filter_module("rustls", LevelFilter::Info)
        .filter_module("html5ever", LevelFilter::Info)
        .filter_module("selectors", LevelFilter::Info)
        .filter_module("mio", LevelFilter::Info)
        .format_indent(Some(2));

    match matches.get_one::<String>("log_level").unwrap().as_str() {
        "trace" => { lb.filter_level(LevelFilter::Trace); }
        "debug" => { lb.filter_level(LevelFilter::Debug); }
        "info" => { lb.filter_level(LevelFilter::Info); }
        "error" => { lb.filter_level(LevelFilter::Error); }
        _ => {}
    }
    lb.init();

    let Some(conf) = conf::load_config(matches.get_one::<String>("config_file").unwrap()) else {
        error!("load config failed!");
        return;
    };

    let skip_probe = *matches.get_one::<bool>("skip_probe").unwrap() || !conf.probe.enabled;
    if skip_probe {
        info!("probe disabled, keep every unique node");
    }
    let no_publish = *matches.get_one::<bool>("no_publish").unwrap();
    let input = matches.get_one::<String>("input").cloned();

    let e_exit: Arc<Notify> = Arc::new(Notify::new());
    tokio::spawn(ctrl_c_handler(e_exit.clone()));

    if let Err(e) = do_all(Arc::new(conf), e_exit, skip_probe, no_publish, input).await {
        error!("pipeline failed: {e}");
    }
    info!("exit.");
}

async fn ctrl_c_handler(e_exit: Arc<Notify>) {
    match tokio::signal::ctrl_c().await {
        Ok(_) => {
            info!("got ctrl_c, shutting down ...");
            e_exit.notify_waiters();
        }
        Err(e) => {
            error!("install ctrl_c handler failed! {e}");
        }
    }
}

async fn do_all(
    conf: Arc<Config>,
    e_exit: Arc<Notify>,
    skip_probe: bool,
    no_publish: bool,
    input: Option<String>,
) -> MyResult<()> {
    let (url_out, url_in) = bounded::<String>(16);
    let (data_out, data_in) = bounded::<(String, String)>(16);
    let (node_out, node_in) = bounded::<Sourced>(64);
    let (uniq_out, uniq_in) = bounded::<Sourced>(64);
    let (good_out, good_in) = async_priority_channel::bounded::<Sourced, u32>(8192);

    let client = collect::build_client(conf.request_timeout_secs)?;
    let nr_workers = conf.workers.max(1);
    info!("use {} worker(s)", nr_workers);

    tokio::spawn(dispatch(
        conf.clone(),
        client.clone(),
        url_out,
        data_out.clone(),
        input,
        e_exit.clone(),
    ));

    let mut st_u2d = JoinSet::new();
    for i in 1..=nr_workers {
        st_u2d.spawn(url2data(i, client.clone(), url_in.clone(), data_out.clone(), e_exit.clone()));
    }
    drop(url_in);
    drop(data_out);

    let mut st_d2n = JoinSet::new();
    for i in 1..=nr_workers {
        st_d2n.spawn(data2node(i, data_in.clone(), node_out.clone(), e_exit.clone()));
    }
    drop(data_in);
    drop(node_out);

    let uniq_handle = tokio::spawn(uniq(node_in, uniq_out, e_exit.clone()));

    let mut st_resolve = JoinSet::new();
    if skip_probe {
        tokio::spawn(passthrough(uniq_in, good_out, e_exit.clone()));
    } else {
        let (ip_out, ip_in) = bounded::<Sourced>(64);
        for i in 1..=nr_workers {
            st_resolve.spawn(resolve(i, uniq_in.clone(), ip_out.clone(), e_exit.clone()));
        }
        drop(uniq_in);
        drop(ip_out);
        tokio::spawn(probe(ip_in, good_out, conf.clone(), e_exit.clone()));
    }

    let sink_handle = tokio::spawn(sink(good_in, e_exit.clone()));

    let total = uniq_handle.await.unwrap_or_default();
    let good = sink_handle.await.unwrap_or_default();
    while st_u2d.join_next().await.is_some() {}
    while st_d2n.join_next().await.is_some() {}
    while st_resolve.join_next().await.is_some() {}

    write_outputs(&conf, &total, &good);

    if conf.git.enabled && !no_publish {
        let paths: Vec<&str> = vec![
            conf.output.total_file.as_str(),
            conf.output.good_file.as_str(),
            conf.output.base64_file.as_str(),
            conf.output.clash_file.as_str(),
        ];
        if !publish::git_sync(&conf.git, &paths).await {
            warn!("publish failed, result files kept on disk");
        }
    }

    debug!("do_all done!!!!");
    Ok(())
}

// 站点间限速等待，期间收到退出信号立即返回true
async fn wait_or_exit(delay_ms: u64, e_exit: &Notify) -> bool {
    tokio::select! {
        _ = e_exit.notified() => true,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
    }
}

// 铺任务：本地文件、固定订阅、各站点文章里扒出来的订阅链接、README源
async fn dispatch(
    conf: Arc<Config>,
    client: Client,
    url_out: Sender<String>,
    data_out: Sender<(String, String)>,
    input: Option<String>,
    e_exit: Arc<Notify>,
) {
    let worker_name = "[dispatch]";

    if let Some(path) = input {
        match tools::read_file(path.as_str()) {
            Some(s) => {
                if data_out.send((format!("file://{path}"), s)).await.is_err() {
                    return;
                }
            }
            None => {
                error!("{worker_name} input file {path} not readable!");
            }
        }
    }

    for url in &conf.subscriptions {
        if url_out.send(url.clone()).await.is_err() {
            return;
        }
    }

    for site in conf.websites.iter().filter(|s| s.enabled) {
        let Some(article) = collect::latest_article_url(worker_name, &client, site).await else {
            continue;
        };
        let links = collect::subscription_links(worker_name, &client, site, article.as_str()).await;
        if links.is_empty() {
            // 文章页自身可能就贴着节点
            if url_out.send(article).await.is_err() {
                return;
            }
        } else {
            for link in links {
                if url_out.send(link).await.is_err() {
                    return;
                }
            }
        }
        if wait_or_exit(conf.request_delay_ms, &e_exit).await {
            debug!("{worker_name} got exit flag");
            return;
        }
    }

    for src in &conf.readme_sources {
        if let Some((u, text)) = collect::readme_source(worker_name, &client, src.as_str()).await {
            if data_out.send((u, text)).await.is_err() {
                return;
            }
        }
    }

    info!("{worker_name} done.");
}

async fn url2data(
    idx: usize,
    client: Client,
    url_in: Receiver<String>,
    data_out: Sender<(String, String)>,
    e_exit: Arc<Notify>,
) {
    let worker_name = format!("[u2d-{idx}]");
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = url_in.recv() => {
                let Ok(url) = r else { break; };
                match client.get(&url).send().await {
                    Ok(it) => {
                        if let Ok(s) = it.text().await {
                            trace!("{worker_name} got {} byte(s) data from {url}", s.len());
                            if let Err(e) = data_out.send((url, s)).await {
                                debug!("{worker_name} putting data got err {e}");
                            }
                            tokio::time::sleep(Duration::from_millis(20)).await;
                        }
                    },
                    Err(err) => {
                        trace!("{worker_name} fetching {url} got err {err}");
                    }
                }
            }
        }
    }
    info!("{worker_name} done.");
}

async fn data2node(
    idx: usize,
    data_in: Receiver<(String, String)>,
    node_out: Sender<Sourced>,
    e_exit: Arc<Notify>,
) {
    let worker_name = format!("[d2n-{idx}]");
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = data_in.recv() => {
                let Ok((url, data)) = r else { break; };
                let nodes = proto::data2nodes(worker_name.as_str(), data.as_str(), url.as_str());
                trace!("{worker_name} got {} node(s) from {url}", nodes.len());
                for _node in nodes {
                    if let Err(e) = node_out.send(_node).await {
                        debug!("{worker_name} putting data got err {e}");
                    }
                }
            }
        }
    }
    info!("{worker_name} done.");
}

// 去重并顺手记下全量列表
async fn uniq(node_in: Receiver<Sourced>, uniq_out: Sender<Sourced>, e_exit: Arc<Notify>) -> Vec<String> {
    let worker_name = "[uniq]";
    let mut st = HashSet::new();
    let mut total: Vec<String> = Vec::new();
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = node_in.recv() => {
                let Ok(_node) = r else { break; };
                let mut state = DefaultHasher::new();
                Hash::hash(&_node.node, &mut state);
                let _hash_value = state.finish();
                if !st.contains(&_hash_value) {
                    st.insert(_hash_value);
                    total.push(proto::serialize(&_node.node));
                    if let Err(e) = uniq_out.send(_node).await {
                        debug!("{worker_name} putting data got err {e}");
                    }
                } else {
                    trace!("{worker_name} dup {}", _node.raw);
                }
            }
        }
    }
    info!("{worker_name} {} unique node(s).", total.len());
    total
}

async fn resolve(idx: usize, uniq_in: Receiver<Sourced>, ip_out: Sender<Sourced>, e_exit: Arc<Notify>) {
    let worker_name = format!("[resolve-{idx}]");
    let l_nameserver = vec![
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53),
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)), 53),
    ];
    let mut dns = DNSClient::new(l_nameserver);
    dns.set_timeout(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = uniq_in.recv() => {
                let Ok(mut _n) = r else { break; };
                let ip: IpAddr = _n.node.server.parse().unwrap_or_else(|_| IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
                if ip.is_unspecified() {
                    let l_real_ip = dns.query_a(_n.node.server.as_str()).await.unwrap_or_default();
                    if l_real_ip.is_empty() {
                        trace!("{worker_name} can't resolve {}", _n.node.server);
                        continue;
                    }
                    _n.real_ip = l_real_ip[0].to_string();
                } else {
                    _n.real_ip = _n.node.server.clone();
                }
                if let Err(e) = ip_out.send(_n).await {
                    debug!("{worker_name} putting data got err {e}");
                }
            }
        }
    }
    info!("{worker_name} done.");
}

async fn probe(
    ip_in: Receiver<Sourced>,
    good_out: async_priority_channel::Sender<Sourced, u32>,
    conf: Arc<Config>,
    e_exit: Arc<Notify>,
) {
    let worker_name = "[probe]";
    let mut tasks = FuturesUnordered::new(); // 控制同时存在的协程数量
    let max_tasks = conf.probe.concurrency.max(1);
    let wait = Duration::from_secs(conf.probe.timeout_secs);

    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = ip_in.recv() => {
                let Ok(_node) = r else { break; };
                let tx = good_out.clone();
                let task = tokio::spawn(async move {
                    let addr_s = if _node.real_ip.contains(':') {
                        format!("[{}]:{}", _node.real_ip, _node.node.port)
                    } else {
                        format!("{}:{}", _node.real_ip, _node.node.port)
                    };
                    let Ok(addr) = addr_s.parse::<SocketAddr>() else {
                        trace!("[probe] bad addr {addr_s}");
                        return;
                    };
                    let start = SystemTime::now();
                    match timeout(wait, TcpStream::connect(addr)).await {
                        Ok(Ok(mut stream)) => {
                            let _latency = SystemTime::now().duration_since(start).unwrap_or_default().as_millis();
                            let _ = stream.shutdown().await;
                            // 延迟小的优先级高
                            if let Err(e) = tx.send(_node, 999999u32.saturating_sub(_latency as u32)).await {
                                debug!("[probe] putting data got err {e}");
                            }
                        },
                        Ok(Err(err)) => {
                            trace!("[probe] connect to {_node} failed {err}, addr={addr}");
                        },
                        Err(_) => {}
                    }
                });
                tasks.push(task);
                if tasks.len() >= max_tasks {
                    let _ = tasks.select_next_some().await;
                }
            }
        }
    }
    while tasks.next().await.is_some() {}
    info!("{worker_name} done.");
}

async fn passthrough(
    uniq_in: Receiver<Sourced>,
    good_out: async_priority_channel::Sender<Sourced, u32>,
    e_exit: Arc<Notify>,
) {
    let worker_name = "[pass]";
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = uniq_in.recv() => {
                let Ok(_node) = r else { break; };
                if let Err(e) = good_out.send(_node, 0).await {
                    debug!("{worker_name} putting data got err {e}");
                }
            }
        }
    }
    info!("{worker_name} done.");
}

async fn sink(
    good_in: async_priority_channel::Receiver<Sourced, u32>,
    e_exit: Arc<Notify>,
) -> Vec<(Sourced, u32)> {
    let worker_name = "[sink]";
    let mut out: Vec<(Sourced, u32)> = Vec::new();
    loop {
        tokio::select! {
            _ = e_exit.notified() => {
                debug!("{worker_name} got exit flag");
                break;
            },
            r = good_in.recv() => {
                let Ok((_node, prio)) = r else { break; };
                let latency = 999999u32.saturating_sub(prio);
                trace!("{worker_name} keep {_node} {latency}ms from {}", _node.source);
                out.push((_node, latency));
            }
        }
    }
    out.sort_by_key(|(_, latency)| *latency);
    info!("{worker_name} kept {} node(s).", out.len());
    out
}

fn write_outputs(conf: &Config, total: &[String], good: &[(Sourced, u32)]) {
    let worker_name = "[output]";

    let mut total_text = total.join("\n");
    total_text.push('\n');
    tools::write_file(conf.output.total_file.as_str(), total_text.as_str());

    let good_uris: Vec<String> = good.iter().map(|(s, _)| proto::serialize(&s.node)).collect();
    let mut good_text = good_uris.join("\n");
    good_text.push('\n');
    tools::write_file(conf.output.good_file.as_str(), good_text.as_str());
    tools::write_file(conf.output.base64_file.as_str(), tools::b64e(good_text.as_str()).as_str());

    let nodes: Vec<&ProxyNode> = good.iter().map(|(s, _)| &s.node).collect();
    tools::write_file(conf.output.clash_file.as_str(), proto::to_clash_document(&nodes).as_str());

    let rate = if total.is_empty() {
        0.0
    } else {
        good.len() as f64 * 100.0 / total.len() as f64
    };
    info!(
        "{worker_name} total {} node(s), good {} node(s), pass rate {rate:.1}%",
        total.len(),
        good.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delay_wait_honors_exit_flag() {
        let e_exit = Arc::new(Notify::new());
        let flag = e_exit.clone();
        let h = tokio::spawn(async move { wait_or_exit(60_000, flag.as_ref()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        e_exit.notify_waiters();
        assert!(h.await.unwrap());

        assert!(!wait_or_exit(1, e_exit.as_ref()).await);
    }
}
