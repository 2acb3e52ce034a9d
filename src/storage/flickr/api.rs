//! 远程照片服务接口
//!
//! [`FlickrBackend`](super::FlickrBackend) 只通过 [`PhotoApi`] 访问远程服务，
//! HTTP 客户端是其中一种实现，测试里用内存实现替换。

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// 已登录用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// 相册
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photoset {
    pub id: String,
    pub title: String,
}

/// 照片元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Photo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// 原始格式（扩展名），服务端不一定返回
    #[serde(default)]
    pub originalformat: Option<String>,
    /// 空格分隔的标签
    #[serde(default)]
    pub tags: String,
    /// 原图地址
    #[serde(default)]
    pub url_o: Option<String>,
}

/// 分页结果；`page >= pages` 表示已是最后一页
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub page: u32,
    pub pages: u32,
    pub items: Vec<T>,
}

/// 上传参数
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub title: String,
    pub tags: String,
    pub is_public: bool,
    pub is_friend: bool,
    pub is_family: bool,
}

#[async_trait]
pub trait PhotoApi: Send + Sync {
    /// 完成授权并返回当前用户
    async fn login(&self) -> Result<User>;

    async fn photosets(&self, user: &User, page: u32) -> Result<Page<Photoset>>;

    async fn photoset_photos(&self, photoset_id: &str, page: u32) -> Result<Page<Photo>>;

    /// 不属于任何相册的照片
    async fn photos_not_in_set(&self, page: u32) -> Result<Page<Photo>>;

    /// 下载原图到 `dest`（父目录已存在）
    async fn download(&self, photo: &Photo, dest: &Path) -> Result<()>;

    /// 上传照片，返回新照片的 id
    async fn upload(&self, src: &Path, request: &UploadRequest) -> Result<String>;

    /// 创建相册，`primary_photo_id` 同时成为相册的第一张照片
    async fn create_photoset(&self, title: &str, primary_photo_id: &str) -> Result<Photoset>;

    async fn add_photo(&self, photoset_id: &str, photo_id: &str) -> Result<()>;
}

/// 宽松解析数字：服务端有时用字符串表示页码，缺失或无法解析时为 0
pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let wide = match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    // 超出范围的值取上限，分页上限会终止循环
    Ok(u32::try_from(wide).unwrap_or(u32::MAX))
}
