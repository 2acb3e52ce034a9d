use super::{filter_files, filter_folders, Backend, FileInfo, FolderInfo, Listing};
use crate::config::Filters;
use crate::core::checksum::md5_file;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地文件系统后端
///
/// 文件夹是根目录下的一级子目录，文件只取目录中的一级文件（不递归）。
pub struct LocalBackend {
    base_path: PathBuf,
    filters: Filters,
    name: String,
}

/// 一级目录项的类型
#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

impl LocalBackend {
    pub fn new(path: &str, filters: Filters) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        if !base_path.is_dir() {
            return Err(SyncError::Config(format!("'{}' 不是一个文件夹", path)));
        }
        let name = format!("local:{}", path);
        Ok(Self {
            base_path,
            filters,
            name,
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 列出目录下一级的条目名
    async fn read_entries(dir: PathBuf, kind: EntryKind) -> Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        // 使用 spawn_blocking 避免阻塞 async runtime
        let names = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|entry| {
                    let file_type = entry.file_type();
                    match kind {
                        EntryKind::Dir => file_type.is_dir(),
                        EntryKind::File => file_type.is_file(),
                    }
                })
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(names)
    }

    async fn copy_into(src: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, dest).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn list_folders(&self) -> Listing<'_, FolderInfo> {
        let folders = stream::once(Self::read_entries(self.base_path.clone(), EntryKind::Dir))
            .map_ok(|names| {
                stream::iter(
                    names
                        .into_iter()
                        .map(|name| Ok::<_, SyncError>(FolderInfo::new(name.clone(), name))),
                )
            })
            .try_flatten()
            .boxed();
        filter_folders(folders, &self.filters.folders)
    }

    fn list_files<'a>(&'a self, folder: Option<&'a FolderInfo>) -> Listing<'a, FileInfo> {
        let prefix = folder
            .filter(|f| !f.is_root())
            .map(|f| f.id.clone())
            .unwrap_or_default();
        let dir = self.resolve_path(&prefix);

        let files = stream::once(Self::read_entries(dir, EntryKind::File))
            .map_ok(move |names| {
                let prefix = prefix.clone();
                stream::iter(names.into_iter().map(move |name| {
                    let id = if prefix.is_empty() {
                        name.clone()
                    } else {
                        Self::normalize_path(&format!("{}/{}", prefix, name))
                    };
                    Ok::<_, SyncError>(FileInfo::new(id, name))
                }))
            })
            .try_flatten()
            .boxed();
        filter_files(files, &self.filters.files)
    }

    async fn download(&self, file: &FileInfo, dest: &Path) -> Result<()> {
        let src = self.resolve_path(&file.id);
        tracing::debug!("复制: {:?} -> {:?}", src, dest);
        Self::copy_into(&src, dest).await
    }

    async fn upload(
        &self,
        src: &Path,
        folder_name: Option<&str>,
        file_name: &str,
        _checksum: Option<&str>,
    ) -> Result<()> {
        let mut dest = self.base_path.clone();
        if let Some(folder) = folder_name {
            dest.push(folder);
        }
        dest.push(file_name);
        tracing::debug!("写入: {:?} -> {:?}", src, dest);
        Self::copy_into(src, &dest).await
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.base_path)
    }

    async fn checksum(&self, file: &FileInfo) -> Result<Option<String>> {
        if file.checksum.is_some() {
            return Ok(file.checksum.clone());
        }
        let sum = md5_file(&self.resolve_path(&file.id)).await?;
        Ok(Some(sum))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
