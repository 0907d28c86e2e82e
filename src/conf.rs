use log::error;
use serde::Deserialize;

use crate::tools;

/// One scrape target: a blog front page, the CSS selectors that locate the
/// latest article, and the regexes that pull subscription links out of it.
#[derive(Debug, Clone, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub link_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConf {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConf {
    #[serde(default = "default_total_file")]
    pub total_file: String,
    #[serde(default = "default_good_file")]
    pub good_file: String,
    #[serde(default = "default_base64_file")]
    pub base64_file: String,
    #[serde(default = "default_clash_file")]
    pub clash_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitConf {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_git_name")]
    pub user_name: String,
    #[serde(default = "default_git_email")]
    pub user_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub websites: Vec<Site>,
    /// Plain subscription URLs fed to the pipeline as-is.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Raw README-style sources whose text is scanned for URIs directly.
    #[serde(default)]
    pub readme_sources: Vec<String>,
    #[serde(default = "default_probe_conf")]
    pub probe: ProbeConf,
    #[serde(default = "default_output_conf")]
    pub output: OutputConf,
    #[serde(default = "default_git_conf")]
    pub git: GitConf,
}

fn default_true() -> bool {
    true
}
fn default_probe_concurrency() -> usize {
    200
}
fn default_probe_timeout() -> u64 {
    3
}
fn default_total_file() -> String {
    String::from("result/nodetotal.txt")
}
fn default_good_file() -> String {
    String::from("result/nodelist.txt")
}
fn default_base64_file() -> String {
    String::from("result/subscription.txt")
}
fn default_clash_file() -> String {
    String::from("result/clash.yaml")
}
fn default_branch() -> String {
    String::from("main")
}
fn default_remote() -> String {
    String::from("origin")
}
fn default_git_name() -> String {
    String::from("node-harvest")
}
fn default_git_email() -> String {
    String::from("action@github.com")
}
fn default_request_timeout() -> u64 {
    30
}
fn default_request_delay() -> u64 {
    2000
}
fn default_workers() -> usize {
    4
}
fn default_probe_conf() -> ProbeConf {
    ProbeConf {
        enabled: true,
        concurrency: default_probe_concurrency(),
        timeout_secs: default_probe_timeout(),
    }
}
fn default_output_conf() -> OutputConf {
    OutputConf {
        total_file: default_total_file(),
        good_file: default_good_file(),
        base64_file: default_base64_file(),
        clash_file: default_clash_file(),
    }
}
fn default_git_conf() -> GitConf {
    GitConf {
        enabled: false,
        branch: default_branch(),
        remote: default_remote(),
        user_name: default_git_name(),
        user_email: default_git_email(),
    }
}

pub fn load_config(file_path: &str) -> Option<Config> {
    let s = tools::read_file(file_path)?;
    match serde_json::from_str::<Config>(s.as_str()) {
        Ok(conf) => Some(conf),
        Err(e) => {
            error!("config json load failed {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let conf: Config = serde_json::from_str(r#"{"websites": []}"#).unwrap();
        assert_eq!(conf.workers, 4);
        assert_eq!(conf.probe.concurrency, 200);
        assert_eq!(conf.output.total_file, "result/nodetotal.txt");
        assert!(!conf.git.enabled);
    }

    #[test]
    fn site_entry_parses() {
        let conf: Config = serde_json::from_str(
            r#"{
                "websites": [{
                    "name": "mibei77",
                    "url": "https://www.mibei77.com/",
                    "selectors": [".post h2 a", ".entry-title a"],
                    "link_patterns": ["http://mm\\.mibei77\\.com/.+?\\.txt"]
                }],
                "subscriptions": ["https://sub.example/x.txt"]
            }"#,
        )
        .unwrap();
        assert_eq!(conf.websites.len(), 1);
        assert!(conf.websites[0].enabled);
        assert_eq!(conf.websites[0].selectors.len(), 2);
        assert_eq!(conf.subscriptions.len(), 1);
    }
}
