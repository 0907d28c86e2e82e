use chrono::Local;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use tokio::process::Command;

use crate::conf::GitConf;

async fn run_git(worker_name: &str, args: &[&str]) -> Option<(bool, String)> {
    match Command::new("git").args(args).output().await {
        Ok(output) => {
            let mut s = String::from_utf8(output.stdout).unwrap_or_default();
            s.push_str(String::from_utf8(output.stderr).unwrap_or_default().as_str());
            trace!("{worker_name} git {} -> {}", args.join(" "), s.trim_end());
            Some((output.status.success(), s))
        }
        Err(err) => {
            error!("{worker_name} git {:?} exec failed!!! {err}", args);
            None
        }
    }
}

/// Commits and pushes the result files. Returns false only on a real git
/// failure; an empty commit is treated as success.
pub async fn git_sync(git: &GitConf, paths: &[&str]) -> bool {
    let worker_name = "[publish]";

    let mut add_args = vec!["add", "--"];
    add_args.extend_from_slice(paths);
    match run_git(worker_name, &add_args).await {
        Some((true, _)) => {}
        _ => {
            error!("{worker_name} git add failed!");
            return false;
        }
    }

    let msg = format!("update node list {}", Local::now().format("%Y-%m-%d %H:%M"));
    let name_cfg = format!("user.name={}", git.user_name);
    let email_cfg = format!("user.email={}", git.user_email);
    let commit_args = vec![
        "-c", name_cfg.as_str(),
        "-c", email_cfg.as_str(),
        "commit", "-m", msg.as_str(),
    ];
    match run_git(worker_name, &commit_args).await {
        Some((true, _)) => {}
        Some((false, out)) => {
            if out.contains("nothing to commit") || out.contains("nothing added to commit") {
                info!("{worker_name} nothing to commit, skip push");
                return true;
            }
            error!("{worker_name} git commit failed! {}", out.trim_end());
            return false;
        }
        None => return false,
    }

    match run_git(worker_name, &["push", git.remote.as_str(), git.branch.as_str()]).await {
        Some((true, _)) => {
            info!("{worker_name} pushed to {}/{}", git.remote, git.branch);
            true
        }
        _ => {
            error!("{worker_name} git push failed!");
            false
        }
    }
}
