use chrono::{Datelike, Local};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::header;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

use crate::conf::Site;

// 轮换UA，省得被当成爬虫拦掉
static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

pub fn build_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    let ua = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&USER_AGENTS[0]);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.8,en;q=0.6"),
    );
    Client::builder()
        .user_agent(*ua)
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

async fn fetch_text(worker_name: &str, client: &Client, url: &str) -> Option<String> {
    match client.get(url).send().await {
        Ok(o) => match o.text().await {
            Ok(s) => {
                trace!("{worker_name} got {} byte(s) from {url}", s.len());
                Some(s)
            }
            Err(e) => {
                warn!("{worker_name} can't get content from {url} !!! {e}");
                None
            }
        },
        Err(e) => {
            warn!("{worker_name} fetching {url} got err {e}");
            None
        }
    }
}

// 今天的日期在不同站点的文章标题/链接里的几种写法
fn today_tokens() -> Vec<String> {
    let now = Local::now();
    vec![
        now.format("%Y-%m-%d").to_string(),
        now.format("%Y/%m/%d").to_string(),
        now.format("%Y%m%d").to_string(),
        format!("{}月{}日", now.month(), now.day()),
        format!("{:02}月{:02}日", now.month(), now.day()),
    ]
}

fn extract_candidates(body: &str, selectors: &[String]) -> Vec<(String, String)> {
    let mut candidates: Vec<(String, String)> = Vec::new();
    let doc = Html::parse_document(body);
    for sel_s in selectors {
        let Ok(sel) = Selector::parse(sel_s.as_str()) else {
            warn!("bad selector {sel_s:?}, skip");
            continue;
        };
        for el in doc.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                let text: String = el.text().collect();
                candidates.push((String::from(href), text));
            }
        }
        // 选择器按优先级排列，命中即止
        if !candidates.is_empty() {
            break;
        }
    }
    candidates
}

fn pick_article(candidates: &[(String, String)], tokens: &[String]) -> Option<String> {
    for (href, text) in candidates {
        if tokens.iter().any(|t| href.contains(t.as_str()) || text.contains(t.as_str())) {
            return Some(href.clone());
        }
    }
    candidates.first().map(|(href, _)| href.clone())
}

fn absolutize(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => String::from(href),
    }
}

/// Finds the site's newest article, preferring one dated today.
pub async fn latest_article_url(worker_name: &str, client: &Client, site: &Site) -> Option<String> {
    let body = fetch_text(worker_name, client, site.url.as_str()).await?;
    let candidates = extract_candidates(body.as_str(), &site.selectors);
    if candidates.is_empty() {
        warn!("{worker_name} can't find lastest page url for {} !!!", site.name);
        return None;
    }
    let href = pick_article(&candidates, &today_tokens())?;
    let article = absolutize(site.url.as_str(), href.as_str());
    trace!("{worker_name} {} lastest article {article}", site.name);
    Some(article)
}

fn extract_links(body: &str, patterns: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let defaults = vec![String::from(r#"https?://[^\s"'<>]+?\.(?:txt|ya?ml|json)"#)];
    let patterns = if patterns.is_empty() { &defaults } else { patterns };
    for pat in patterns {
        let re = match Regex::new(pat.as_str()) {
            Ok(re) => re,
            Err(e) => {
                warn!("bad link pattern {pat:?}: {e}");
                continue;
            }
        };
        for m in re.find_iter(body) {
            let link = String::from(m.as_str());
            if !out.contains(&link) {
                out.push(link);
            }
        }
    }
    out
}

/// Pulls subscription file links out of an article page.
pub async fn subscription_links(
    worker_name: &str,
    client: &Client,
    site: &Site,
    article_url: &str,
) -> Vec<String> {
    let Some(body) = fetch_text(worker_name, client, article_url).await else {
        return Vec::new();
    };
    let links = extract_links(body.as_str(), &site.link_patterns);
    trace!("{worker_name} {} got {} link(s) from {article_url}", site.name, links.len());
    links
}

// README类源：取```围栏里的内容，没有围栏就给整篇
pub async fn readme_source(
    worker_name: &str,
    client: &Client,
    url: &str,
) -> Option<(String, String)> {
    let content = fetch_text(worker_name, client, url).await?;
    let re = Regex::new(r"(?s)```(.+?)```").unwrap();
    let mut blocks = String::new();
    for m in re.captures_iter(content.as_str()) {
        blocks.push_str(&m[1]);
        blocks.push('\n');
    }
    if blocks.is_empty() {
        Some((String::from(url), content))
    } else {
        trace!("{worker_name} got {} byte(s) fenced content from {url}", blocks.len());
        Some((String::from(url), blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_selector_priority() {
        let html = r#"<html><body>
            <div class="post-title"><a href="/a/first.html">2026-08-24 nodes</a></div>
            <h2><a href="/a/other.html">older</a></h2>
        </body></html>"#;
        let sels = vec![String::from(".post-title a"), String::from("h2 a")];
        let got = extract_candidates(html, &sels);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "/a/first.html");
    }

    #[test]
    fn pick_prefers_dated_article() {
        let candidates = vec![
            (String::from("/old.html"), String::from("yesterday")),
            (String::from("/new.html"), String::from("nodes 2030-01-02")),
        ];
        let tokens = vec![String::from("2030-01-02")];
        assert_eq!(pick_article(&candidates, &tokens).as_deref(), Some("/new.html"));

        let none_match = vec![String::from("1999-01-01")];
        assert_eq!(pick_article(&candidates, &none_match).as_deref(), Some("/old.html"));
    }

    #[test]
    fn links_deduplicate_and_default_pattern_works() {
        let body = "get http://mm.example.com/2026/08/sub.txt and again \
                    http://mm.example.com/2026/08/sub.txt plus http://x.example/c.yaml ok";
        let got = extract_links(body, &[]);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], "http://mm.example.com/2026/08/sub.txt");
    }

    #[test]
    fn relative_hrefs_resolve_against_site() {
        assert_eq!(
            absolutize("https://www.mibei77.com/", "/2026/08/a.html"),
            "https://www.mibei77.com/2026/08/a.html"
        );
        assert_eq!(
            absolutize("https://www.mibei77.com/", "https://other.example/x"),
            "https://other.example/x"
        );
    }
}
