//! 授权凭据的加载与保存
//!
//! 凭据文件放在程序所在目录下。存在就直接复用，否则走一次交互授权
//! （打开浏览器，读取用户输入的验证码），成功后写入文件供以后使用。

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// 凭据文件名
pub const TOKEN_FILENAME: &str = ".flickrToken";

/// OAuth 访问凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
    #[serde(default)]
    pub user_nsid: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// 授权时间（Unix 时间戳）
    #[serde(default)]
    pub created_at: i64,
}

/// 凭据文件
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取凭据；文件不存在或已损坏时返回 `None`
    pub fn load(&self) -> Result<Option<AccessToken>> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<AccessToken>(&content) {
            Ok(token) => {
                debug!("已加载授权凭据: {:?}", self.path);
                Ok(Some(token))
            }
            Err(e) => {
                warn!("授权凭据文件已损坏，将重新授权: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, token: &AccessToken) -> Result<()> {
        let content = serde_json::to_string_pretty(token)
            .map_err(|e| SyncError::Auth(format!("无法序列化授权凭据: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        debug!("已保存授权凭据: {:?}", self.path);
        Ok(())
    }
}

/// 凭据文件的默认位置：程序所在目录
pub fn default_token_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join(TOKEN_FILENAME))
}

/// 交互授权中获取验证码的方式
pub trait Verifier: Send + Sync {
    fn verify(&self, authorize_url: &str) -> Result<String>;
}

/// 在终端中提示用户完成授权
pub struct ConsoleVerifier;

impl Verifier for ConsoleVerifier {
    fn verify(&self, authorize_url: &str) -> Result<String> {
        if let Err(e) = open_browser(authorize_url) {
            warn!("无法打开浏览器: {}", e);
        }

        let mut stdout = std::io::stdout();
        writeln!(stdout, "请在浏览器中完成授权: {}", authorize_url)?;
        writeln!(stdout, "Please enter the OAuth verifier tag once logged in:")?;
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let code = line.trim().to_string();
        if code.is_empty() {
            return Err(SyncError::Auth("未输入验证码".to_string()));
        }
        Ok(code)
    }
}

/// 用系统默认程序打开链接
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()?;
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("open").arg(url).spawn()?;
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Command::new("xdg-open").arg(url).spawn()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> AccessToken {
        AccessToken {
            token: "72157-abc".to_string(),
            secret: "s3cr3t".to_string(),
            user_nsid: Some("12345@N00".to_string()),
            username: Some("someone".to_string()),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_missing_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join(TOKEN_FILENAME));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join(TOKEN_FILENAME));

        store.save(&token()).unwrap();

        assert_eq!(store.load().unwrap(), Some(token()));
    }

    #[test]
    fn test_corrupted_token_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILENAME);
        std::fs::write(&path, "not json").unwrap();

        let store = TokenStore::new(path);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_default_token_path_uses_reserved_name() {
        let path = default_token_path().unwrap();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(TOKEN_FILENAME));
    }
}
