//! 测试用的内存后端

use super::{listing_of, Backend, FileInfo, FolderInfo, Listing};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 按给定顺序返回文件夹和文件，并记录收到的上传
#[derive(Default)]
pub struct StubBackend {
    name: String,
    folders: Vec<(FolderInfo, Vec<FileInfo>)>,
    root_files: Vec<FileInfo>,
    /// 下载这些文件名时写入一半内容后返回错误
    failing: Vec<String>,
    /// 这些文件夹的文件列表在最后一项之后出错
    broken: Vec<String>,
    downloads: Mutex<Vec<PathBuf>>,
    uploads: Mutex<Vec<(Option<String>, String, Option<String>)>>,
}

impl StubBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn folder(mut self, name: &str, files: Vec<FileInfo>) -> Self {
        let id = format!("id-{}", name);
        self.folders.push((FolderInfo::new(id, name), files));
        self
    }

    pub fn root(mut self, files: Vec<FileInfo>) -> Self {
        self.root_files = files;
        self
    }

    pub fn failing(mut self, file_name: &str) -> Self {
        self.failing.push(file_name.to_string());
        self
    }

    pub fn broken_listing(mut self, folder_name: &str) -> Self {
        self.broken.push(folder_name.to_string());
        self
    }

    /// 下载写入过的路径
    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// 已上传的 (文件夹, 文件名, 校验和)
    pub fn uploads(&self) -> Vec<(Option<String>, String, Option<String>)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

pub fn file(name: &str) -> FileInfo {
    FileInfo::new(name, name)
}

pub fn file_with_checksum(name: &str, checksum: &str) -> FileInfo {
    FileInfo::new(name, name).with_checksum(checksum)
}

/// 收集后端的全部文件夹
pub async fn collect_folders(backend: &dyn Backend) -> Vec<FolderInfo> {
    backend.list_folders().try_collect().await.unwrap()
}

/// 收集一个文件夹的全部文件
pub async fn collect_files(backend: &dyn Backend, folder: Option<&FolderInfo>) -> Vec<FileInfo> {
    backend.list_files(folder).try_collect().await.unwrap()
}

#[async_trait]
impl Backend for StubBackend {
    fn list_folders(&self) -> Listing<'_, FolderInfo> {
        listing_of(self.folders.iter().map(|(f, _)| f.clone()).collect())
    }

    fn list_files<'a>(&'a self, folder: Option<&'a FolderInfo>) -> Listing<'a, FileInfo> {
        match folder.filter(|f| !f.is_root()) {
            None => listing_of(self.root_files.clone()),
            Some(folder) => match self.folders.iter().find(|(f, _)| f.id == folder.id) {
                Some((f, files)) if self.broken.contains(&f.name) => {
                    let error = SyncError::Network(format!("列出 {} 中断", f.name));
                    listing_of(files.clone())
                        .chain(stream::once(future::ready(Err(error))))
                        .boxed()
                }
                Some((_, files)) => listing_of(files.clone()),
                None => stream::once(future::ready(Err(SyncError::NotFound(
                    folder.name.clone(),
                ))))
                .boxed(),
            },
        }
    }

    async fn download(&self, file: &FileInfo, dest: &Path) -> Result<()> {
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.push(dest.to_path_buf());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.failing.contains(&file.name) {
            tokio::fs::write(dest, b"part").await?;
            return Err(SyncError::Network(format!("下载 {} 失败", file.name)));
        }
        tokio::fs::write(dest, file.name.as_bytes()).await?;
        Ok(())
    }

    async fn upload(
        &self,
        _src: &Path,
        folder_name: Option<&str>,
        file_name: &str,
        checksum: Option<&str>,
    ) -> Result<()> {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((
                folder_name.map(str::to_string),
                file_name.to_string(),
                checksum.map(str::to_string),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
