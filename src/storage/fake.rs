//! 合成后端：固定数量、按位置命名的文件夹和文件，不做真实 IO

use super::{filter_files, filter_folders, Backend, FileInfo, FolderInfo, Listing};
use crate::config::Filters;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use rand::Rng;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

const FOLDER_COUNT: u32 = 5;
const FILE_COUNT: u32 = 5;

pub struct FakeBackend {
    filters: Filters,
    /// 每个条目的模拟延迟上限，0 表示不延迟
    max_latency: Duration,
}

impl FakeBackend {
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            max_latency: Duration::from_millis(200),
        }
    }

    pub fn with_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    /// 倒序字母：位置 0 对应最大的字母
    fn letter(index: u32, count: u32) -> char {
        char::from_u32(64 + count - index).unwrap_or('?')
    }

    async fn simulate_latency(&self) {
        if self.max_latency.is_zero() {
            return;
        }
        let max_ms = self.max_latency.as_millis().max(1) as u64;
        let ms = rand::thread_rng().gen_range(max_ms / 2..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn list_folders(&self) -> Listing<'_, FolderInfo> {
        let folders = stream::iter(0..FOLDER_COUNT)
            .then(move |i| async move {
                self.simulate_latency().await;
                let name = format!("{} Folder", Self::letter(i, FOLDER_COUNT));
                Ok::<_, SyncError>(FolderInfo::new(i.to_string(), name))
            })
            .boxed();
        filter_folders(folders, &self.filters.folders)
    }

    fn list_files<'a>(&'a self, folder: Option<&'a FolderInfo>) -> Listing<'a, FileInfo> {
        let prefix = folder.filter(|f| !f.is_root()).map(|f| f.id.as_str());
        let files = stream::iter(0..FILE_COUNT)
            .then(move |i| async move {
                self.simulate_latency().await;
                let id = match prefix {
                    Some(p) => format!("{}/{}", p, i),
                    None => i.to_string(),
                };
                let name = format!("{} File", Self::letter(i, FILE_COUNT));
                Ok::<_, SyncError>(FileInfo::new(id, name))
            })
            .boxed();
        filter_files(files, &self.filters.files)
    }

    async fn download(&self, file: &FileInfo, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(dest, file.name.as_bytes()).await?;
        Ok(())
    }

    async fn upload(
        &self,
        src: &Path,
        folder_name: Option<&str>,
        file_name: &str,
        checksum: Option<&str>,
    ) -> Result<()> {
        self.simulate_latency().await;
        tracing::info!(
            "合成上传: {:?} -> {}/{} (checksum={:?})",
            src,
            folder_name.unwrap_or(""),
            file_name,
            checksum
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
