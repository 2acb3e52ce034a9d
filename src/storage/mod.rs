pub mod fake;
pub mod flickr;
pub mod local;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::{AppConfig, Filters};
use crate::core::retry::RetryPolicy;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::stream::{BoxStream, TryStreamExt};
use futures::{future, StreamExt};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use fake::FakeBackend;
pub use flickr::FlickrBackend;
pub use local::LocalBackend;

/// 源/目标标识中代表远程服务的关键字
pub const PATH_FLICKR: &str = "flickr";
/// 源/目标标识中代表合成后端的关键字
pub const PATH_FAKE: &str = "fake";

/// 文件夹信息（目录，或远程相册）
///
/// `id` 只在同一个后端内有意义，跨后端按 `name` 匹配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub id: String,
    pub name: String,
    root: bool,
}

impl FolderInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root: false,
        }
    }

    /// 根伪文件夹：不属于任何文件夹的文件
    pub fn root() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            root: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// 作为目标文件夹名使用时的值，根文件夹没有名字
    pub fn dest_name(&self) -> Option<&str> {
        if self.root {
            None
        } else {
            Some(&self.name)
        }
    }
}

/// 文件信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: String,
    /// 显示名（含扩展名）
    pub name: String,
    /// 内容校验和，只有后端能廉价取得时才有
    pub checksum: Option<String>,
}

impl FileInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// 名称过滤器：include/exclude 正则，exclude 优先
///
/// 正则在构造时已设为大小写不敏感，匹配方式是搜索而不是全匹配。
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl NameFilter {
    pub fn new(include: Option<Regex>, exclude: Option<Regex>) -> Self {
        Self { include, exclude }
    }

    pub fn matches(&self, name: &str) -> bool {
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        self.include.as_ref().map_or(true, |re| re.is_match(name))
    }
}

/// 惰性列表：远程后端边取分页边产出
pub type Listing<'a, T> = BoxStream<'a, Result<T>>;

/// 存储后端接口
///
/// 遍历器和同步引擎只依赖这个 trait，不关心具体实现。
#[async_trait]
pub trait Backend: Send + Sync {
    /// 列出所有（经过过滤的）文件夹，保持后端返回的顺序
    fn list_folders(&self) -> Listing<'_, FolderInfo>;

    /// 列出文件夹中的文件；`None` 或根文件夹表示不属于任何文件夹的文件
    fn list_files<'a>(&'a self, folder: Option<&'a FolderInfo>) -> Listing<'a, FileInfo>;

    /// 把文件内容写到 `dest`，会先创建父目录，重复执行会覆盖
    async fn download(&self, file: &FileInfo, dest: &Path) -> Result<()>;

    /// 上传本地文件，`folder_name` 不存在时先创建
    async fn upload(
        &self,
        src: &Path,
        folder_name: Option<&str>,
        file_name: &str,
        checksum: Option<&str>,
    ) -> Result<()>;

    /// 文件系统型后端的根目录；远程后端返回 `None`
    fn local_root(&self) -> Option<&Path> {
        None
    }

    /// 获取文件校验和，默认使用列表时得到的值
    async fn checksum(&self, file: &FileInfo) -> Result<Option<String>> {
        Ok(file.checksum.clone())
    }

    /// 复制文件到另一个后端
    ///
    /// 目标是文件系统时直接下载到 `<root>/<folder>/<name>`；否则先下载到
    /// 临时文件再上传，临时文件在任何退出路径上都会被删除。
    async fn copy_file(
        &self,
        file: &FileInfo,
        folder_name: Option<&str>,
        dest: &dyn Backend,
    ) -> Result<()> {
        if let Some(root) = dest.local_root() {
            let mut path = root.to_path_buf();
            if let Some(folder) = folder_name {
                path.push(folder);
            }
            path.push(&file.name);
            return self.download(file, &path).await;
        }

        let checksum = self.checksum(file).await?;
        let staging = staging_path(&file.name);
        scopeguard::defer! {
            if let Err(e) = std::fs::remove_file(&staging) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("删除临时文件失败 {:?}: {}", staging, e);
                }
            }
        }

        self.download(file, &staging).await?;
        dest.upload(&staging, folder_name, &file.name, checksum.as_deref())
            .await
    }

    /// 后端名称（用于日志）
    fn name(&self) -> &str;
}

/// 临时文件路径，保留扩展名以便远程服务识别格式
fn staging_path(file_name: &str) -> PathBuf {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    std::env::temp_dir().join(format!("photosync-{}{}", uuid::Uuid::new_v4(), ext))
}

/// 按文件夹过滤器筛选
pub(crate) fn filter_folders<'a>(
    folders: Listing<'a, FolderInfo>,
    filter: &'a NameFilter,
) -> Listing<'a, FolderInfo> {
    folders
        .try_filter(move |f| future::ready(filter.matches(&f.name)))
        .boxed()
}

/// 按文件名过滤器筛选
pub(crate) fn filter_files<'a>(
    files: Listing<'a, FileInfo>,
    filter: &'a NameFilter,
) -> Listing<'a, FileInfo> {
    files
        .try_filter(move |f| future::ready(filter.matches(&f.name)))
        .boxed()
}

/// 把已经在内存中的一批记录包装成列表
pub(crate) fn listing_of<'a, T: Send + 'a>(items: Vec<T>) -> Listing<'a, T> {
    futures::stream::iter(items.into_iter().map(Ok)).boxed()
}

/// 根据源/目标标识创建后端
pub fn create_backend(spec: &str, config: &AppConfig, filters: &Filters) -> Result<Arc<dyn Backend>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(SyncError::Config("源或目标不能为空".to_string()));
    }

    if spec.eq_ignore_ascii_case(PATH_FLICKR) {
        tracing::info!("初始化远程存储: flickr");
        let token_path = flickr::auth::default_token_path()?;
        let client = flickr::client::FlickrClient::new(
            &config.api_key,
            &config.api_secret,
            flickr::auth::TokenStore::new(token_path),
            Box::new(flickr::auth::ConsoleVerifier),
        )?;
        let options = flickr::UploadOptions::from_config(config);
        let retry = RetryPolicy::new(config.throttling, config.retry);
        return Ok(Arc::new(FlickrBackend::new(
            client,
            filters.clone(),
            options,
            retry,
        )));
    }

    if spec.eq_ignore_ascii_case(PATH_FAKE) {
        tracing::info!("初始化合成存储");
        return Ok(Arc::new(FakeBackend::new(filters.clone())));
    }

    tracing::info!("初始化本地存储: {}", spec);
    Ok(Arc::new(LocalBackend::new(spec, filters.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{file, StubBackend};
    use regex::RegexBuilder;

    fn re(pattern: &str) -> Option<Regex> {
        Some(
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = NameFilter::default();
        assert!(filter.matches("IMG_0001.JPG"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_include_is_case_insensitive_search() {
        let filter = NameFilter::new(re(r"\.jpg$"), None);
        assert!(filter.matches("IMG_0001.JPG"));
        assert!(filter.matches("img_0001.jpg"));
        assert!(!filter.matches("notes.txt"));
    }

    #[test]
    fn test_exclude_takes_precedence_over_include() {
        let filter = NameFilter::new(re(r"\.jpg$"), re("private"));
        assert!(filter.matches("beach.jpg"));
        assert!(!filter.matches("PRIVATE-beach.jpg"));
        assert!(!filter.matches("notes.txt"));
    }

    #[test]
    fn test_root_folder() {
        let root = FolderInfo::root();
        assert!(root.is_root());
        assert_eq!(root.name, "");
        assert_eq!(root.dest_name(), None);

        let folder = FolderInfo::new("1", "Holiday");
        assert!(!folder.is_root());
        assert_eq!(folder.dest_name(), Some("Holiday"));
    }

    #[tokio::test]
    async fn test_filters_apply_to_listing() {
        let filter = NameFilter::new(re("a"), re("private"));
        let folders = listing_of(vec![
            FolderInfo::new("1", "Holiday"),
            FolderInfo::new("2", "Work"),
            FolderInfo::new("3", "Private Holiday"),
        ]);
        let names: Vec<String> = filter_folders(folders, &filter)
            .map_ok(|f| f.name)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["Holiday"]);
    }

    #[tokio::test]
    async fn test_staging_removed_after_partial_download() {
        let src = StubBackend::new("src")
            .folder("Holiday", vec![file("a.jpg")])
            .failing("a.jpg");
        let dest = StubBackend::new("dest");

        let result = src.copy_file(&file("a.jpg"), Some("Holiday"), &dest).await;

        assert!(matches!(result, Err(SyncError::Network(_))));
        let staged = src.downloads();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].starts_with(std::env::temp_dir()));
        assert!(!staged[0].exists());
        assert!(dest.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_staging_removed_after_upload() {
        let src = StubBackend::new("src").folder("Holiday", vec![file("a.jpg")]);
        let dest = StubBackend::new("dest");

        src.copy_file(&file("a.jpg"), Some("Holiday"), &dest)
            .await
            .unwrap();

        let staged = src.downloads();
        assert_eq!(staged.len(), 1);
        assert!(!staged[0].exists());
        assert_eq!(dest.uploads().len(), 1);
    }

    #[test]
    fn test_staging_path_keeps_extension() {
        let path = staging_path("IMG_0001.JPG");
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("JPG"));
    }
}
