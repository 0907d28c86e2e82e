use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
#[allow(unused_imports)]
use log::{debug, error, trace, warn};

// 添加'='后自动尝试base64解码，标准字母表失败后再试url-safe字母表
pub fn b64d(s: &str, origin: &str, show: bool) -> Option<String> {
    let s = s.trim().trim_end_matches('\n').trim_end_matches('\r');
    if s.is_empty() {
        return None;
    }
    for i in 0..4 {
        let a_s = [s, &"=".repeat(i)].concat();
        match STANDARD.decode(&a_s) {
            Ok(bytes) => return String::from_utf8(bytes).ok(),
            Err(_) => {}
        }
        match URL_SAFE.decode(&a_s) {
            Ok(bytes) => return String::from_utf8(bytes).ok(),
            Err(e) => {
                if show {
                    if s.len() >= 500 {
                        trace!("decode failed {e}, padding {i}, s[0..100] = {}, origin = {origin}", &s[0..100]);
                    } else {
                        trace!("decode failed {e}, padding {i}, s = {s}, origin = {origin}");
                    }
                }
            }
        }
    }
    None
}

pub fn b64e(s: &str) -> String {
    STANDARD.encode(s)
}

// 去掉windows统一路径前面的\?\
pub fn remove_extended_prefix(pathbuf: &PathBuf) -> PathBuf {
    if let Some(prefix) = pathbuf.to_str().and_then(|p| p.strip_prefix(r"\\?\")) {
        PathBuf::from(prefix)
    } else {
        pathbuf.clone()
    }
}

// 读取文件内容，返回String
pub fn read_file(file_path: &str) -> Option<String> {
    let mut path = PathBuf::new();
    path.push(file_path);
    if !path.is_absolute() {
        path = path.canonicalize().unwrap_or_else(|e| {
            debug!("file not found! {e}");
            PathBuf::new()
        });
    }
    if path.as_os_str().is_empty() {
        return None;
    }
    let mut s = String::new();
    let Ok(mut f) = File::open(path.as_path()) else {
        error!("fail to load file {path:?}");
        return None;
    };
    f.read_to_string(&mut s).unwrap_or_default();
    debug!("read {} bytes from file {:?}", s.len(), remove_extended_prefix(&path));

    Some(s)
}

// 写入结果文件，必要时先建目录
pub fn write_file(file_path: &str, content: &str) -> bool {
    let path = Path::new(file_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("create dir {parent:?} failed! {e}");
                return false;
            }
        }
    }
    match File::create(path) {
        Ok(mut f) => {
            if let Err(e) = f.write_all(content.as_bytes()) {
                error!("write {path:?} failed! {e}");
                return false;
            }
            let _ = f.sync_data();
            debug!("wrote {} bytes to {path:?}", content.len());
            true
        }
        Err(e) => {
            error!("create {path:?} failed! {e}");
            false
        }
    }
}

// 调整别名，转为utf8，去掉空格和制表符
pub fn adjust_alias(s: String) -> String {
    let mut alias = textcode::utf8::decode_to_string(s.as_bytes());
    alias = alias.replace(" ", "").replace("\t", "");
    alias
}
