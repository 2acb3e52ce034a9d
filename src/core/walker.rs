//! 遍历器：按顺序策略枚举文件夹和文件，把记录交给 [`WalkVisitor`]
//!
//! 后端的列表是惰性的，不排序时每条记录一到就交给访问者；开启排序时
//! [`ordered`] 先把整个列表缓冲下来再排序，对远程后端意味着必须等所有
//! 分页取完才有输出。

use crate::error::Result;
use crate::storage::{listing_of, Backend, FileInfo, FolderInfo, Listing};
use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// 遍历选项
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// 把不属于任何文件夹的文件当作根文件夹处理
    pub root_files: bool,
    /// 按名称排序文件夹和文件
    pub sort: bool,
    /// 只输出文件夹
    pub folders_only: bool,
}

/// 一个文件及它在所属文件夹里的位置
pub struct FileRecord<'r> {
    pub folder: &'r FolderInfo,
    pub file: &'r FileInfo,
    /// 文件夹中的第一个文件
    pub first: bool,
    /// 文件夹中的最后一个文件
    pub last: bool,
}

/// 遍历结果的接收方
#[async_trait]
pub trait WalkVisitor: Send {
    /// 遍历开始，即使没有任何记录也会调用
    async fn begin(&mut self, _folders_only: bool) -> Result<()> {
        Ok(())
    }

    /// 只列文件夹时，每个文件夹一次
    async fn folder(&mut self, folder: &FolderInfo) -> Result<()>;

    /// 每个文件一次；空文件夹不会产生调用
    async fn file(&mut self, record: &FileRecord<'_>) -> Result<()>;

    /// 遍历结束
    async fn finish(&mut self, _elapsed: Duration) -> Result<()> {
        Ok(())
    }
}

/// 排序时收集整个列表并按名称排好，否则原样传递
///
/// 排序需要完整的列表，这是它与增量输出互斥的原因。
async fn ordered<'a, T, F>(items: Listing<'a, T>, sort: bool, key: F) -> Result<Listing<'a, T>>
where
    T: Send + 'a,
    F: Fn(&T) -> &str,
{
    if !sort {
        return Ok(items);
    }
    let mut all: Vec<T> = items.try_collect().await?;
    all.sort_by(|a, b| key(a).cmp(key(b)));
    Ok(listing_of(all))
}

pub struct Walker<'a> {
    backend: &'a dyn Backend,
    options: WalkOptions,
}

impl<'a> Walker<'a> {
    pub fn new(backend: &'a dyn Backend, options: WalkOptions) -> Self {
        Self { backend, options }
    }

    /// 完整遍历一次，返回耗时
    pub async fn walk(&self, visitor: &mut dyn WalkVisitor) -> Result<Duration> {
        let start = Instant::now();
        visitor.begin(self.options.folders_only).await?;

        let mut folders = self.backend.list_folders();
        if self.options.root_files {
            folders = stream::once(future::ready(Ok(FolderInfo::root())))
                .chain(folders)
                .boxed();
        }
        let mut folders = ordered(folders, self.options.sort, |f| f.name.as_str()).await?;

        let mut count = 0usize;
        while let Some(folder) = folders.try_next().await? {
            count += 1;
            if self.options.folders_only {
                visitor.folder(&folder).await?;
                continue;
            }

            let files = self.backend.list_files(Some(&folder));
            let mut files = ordered(files, self.options.sort, |f| f.name.as_str())
                .await?
                .peekable();
            let mut first = true;
            while let Some(file) = files.try_next().await? {
                let last = Pin::new(&mut files).peek().await.is_none();
                let record = FileRecord {
                    folder: &folder,
                    file: &file,
                    first,
                    last,
                };
                visitor.file(&record).await?;
                first = false;
            }
        }
        debug!("{}: {} 个文件夹", self.backend.name(), count);

        let elapsed = start.elapsed();
        info!("done in {:.1} sec", elapsed.as_secs_f64());
        visitor.finish(elapsed).await?;
        Ok(elapsed)
    }
}
