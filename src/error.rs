//! 错误类型

use thiserror::Error;

/// 同步过程中的错误分类
///
/// 只有 [`SyncError::Network`] 会被重试包装器视为瞬时错误。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 网络/传输层失败（连接中断、超时、5xx）
    #[error("网络错误: {0}")]
    Network(String),

    /// 授权失败，整个运行无法继续
    #[error("授权失败: {0}")]
    Auth(String),

    /// 本地文件系统错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 远程服务拒绝了请求
    #[error("远程服务错误: {0}")]
    Api(String),

    /// 配置无效
    #[error("配置错误: {0}")]
    Config(String),

    /// 后端会话缓存中找不到对应的条目
    #[error("未找到: {0}")]
    NotFound(String),
}

impl SyncError {
    /// 是否为可重试的瞬时网络错误
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            return SyncError::Network(e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() => SyncError::Network(e.to_string()),
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                SyncError::Auth(e.to_string())
            }
            _ => SyncError::Api(e.to_string()),
        }
    }
}

impl From<regex::Error> for SyncError {
    fn from(e: regex::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
