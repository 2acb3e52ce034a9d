//! 同步引擎：遍历源后端，把目标中缺失的文件复制过去

use super::walker::{FileRecord, WalkOptions, WalkVisitor, Walker};
use crate::error::{Result, SyncError};
use crate::storage::{Backend, FileInfo, FolderInfo};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error, info};

/// 同步报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub start_time: i64,
    pub end_time: i64,
    pub files_scanned: u32,
    /// 已复制（dry-run 时为将要复制）的文件数
    pub files_copied: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub dry_run: bool,
    /// 耗时（毫秒）
    pub duration: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// 没有任何文件失败
    pub fn is_success(&self) -> bool {
        self.files_failed == 0
    }
}

/// 源文件夹在目标中的对应位置
#[derive(Default)]
struct DestFolder {
    /// 复制时使用的文件夹名：目标已有时用目标的写法，根文件夹为 `None`
    target: Option<String>,
    files: Vec<FileInfo>,
    /// 本次运行已复制的文件名（小写）
    copied: HashSet<String>,
}

impl DestFolder {
    /// 同名文件（大小写不敏感）
    fn find<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a FileInfo> + 'a {
        let name = name.to_lowercase();
        self.files
            .iter()
            .filter(move |f| f.name.to_lowercase() == name)
    }
}

pub struct SyncEngine<'a> {
    src: &'a dyn Backend,
    dest: &'a dyn Backend,
    dry_run: bool,
    /// 目标文件夹索引（小写名称），首次使用时加载
    dest_folders: Option<HashMap<String, FolderInfo>>,
    /// 按小写文件夹名缓存的目标文件，根文件夹键为空串
    dest_files: HashMap<String, DestFolder>,
    report: SyncReport,
}

impl<'a> SyncEngine<'a> {
    pub fn new(src: &'a dyn Backend, dest: &'a dyn Backend, dry_run: bool) -> Self {
        Self {
            src,
            dest,
            dry_run,
            dest_folders: None,
            dest_files: HashMap::new(),
            report: SyncReport {
                dry_run,
                ..Default::default()
            },
        }
    }

    /// 执行同步，单个文件失败不会中断整个运行
    pub async fn run(mut self, options: WalkOptions) -> Result<SyncReport> {
        let options = WalkOptions {
            folders_only: false,
            ..options
        };
        info!(
            "开始同步: {} -> {}{}",
            self.src.name(),
            self.dest.name(),
            if self.dry_run { " (dry-run)" } else { "" }
        );
        self.report.start_time = chrono::Utc::now().timestamp();

        let src = self.src;
        let elapsed = Walker::new(src, options).walk(&mut self).await?;

        self.report.end_time = chrono::Utc::now().timestamp();
        self.report.duration = elapsed.as_millis() as u64;
        info!(
            "同步完成: 扫描 {}, 复制 {}, 跳过 {}, 失败 {}",
            self.report.files_scanned,
            self.report.files_copied,
            self.report.files_skipped,
            self.report.files_failed
        );
        Ok(self.report)
    }

    /// 在目标中找对应的文件夹，目标没有时返回 `None`
    async fn dest_folder(&mut self, folder: &FolderInfo) -> Result<Option<FolderInfo>> {
        if folder.is_root() {
            return Ok(Some(FolderInfo::root()));
        }

        if self.dest_folders.is_none() {
            // 按名称查找需要完整索引
            let index: HashMap<String, FolderInfo> = self
                .dest
                .list_folders()
                .map_ok(|f| (f.name.to_lowercase(), f))
                .try_collect()
                .await?;
            self.dest_folders = Some(index);
        }

        Ok(self
            .dest_folders
            .as_ref()
            .and_then(|index| index.get(&folder.name.to_lowercase()))
            .cloned())
    }

    /// 目标文件夹中的现有文件，每个文件夹只列一次
    async fn load_dest_files(&mut self, folder: &FolderInfo) -> Result<String> {
        let key = folder.name.to_lowercase();
        if self.dest_files.contains_key(&key) {
            return Ok(key);
        }

        let dest_folder = match self.dest_folder(folder).await? {
            Some(dest) => DestFolder {
                target: dest.dest_name().map(str::to_string),
                files: self.dest.list_files(Some(&dest)).try_collect().await?,
                ..Default::default()
            },
            // 目标中还没有这个文件夹，复制时按源的名称创建
            None => DestFolder {
                target: folder.dest_name().map(str::to_string),
                ..Default::default()
            },
        };
        debug!(
            "目标 {:?} 中已有 {} 个文件",
            dest_folder.target.as_deref().unwrap_or(""),
            dest_folder.files.len()
        );
        self.dest_files.insert(key.clone(), dest_folder);
        Ok(key)
    }

    /// 目标中是否已有相同的文件
    ///
    /// 名称相同（大小写不敏感）且双方都能给出校验和时，校验和必须相等；
    /// 任意一方给不出校验和时按名称判断。
    async fn exists_in_dest(&self, key: &str, file: &FileInfo) -> Result<bool> {
        let Some(dest) = self.dest_files.get(key) else {
            return Ok(false);
        };
        if dest.copied.contains(&file.name.to_lowercase()) {
            return Ok(true);
        }

        let mut src_sum: Option<Option<String>> = None;
        for candidate in dest.find(&file.name) {
            let Some(dest_sum) = self.dest.checksum(candidate).await? else {
                return Ok(true);
            };
            if src_sum.is_none() {
                src_sum = Some(self.src.checksum(file).await?);
            }
            match src_sum.as_ref().and_then(|s| s.as_deref()) {
                None => return Ok(true),
                Some(sum) if sum == dest_sum => return Ok(true),
                Some(sum) => debug!("校验和不同 {}: {} != {}", file.name, sum, dest_sum),
            }
        }
        Ok(false)
    }

    async fn sync_file(&mut self, folder: &FolderInfo, key: &str, file: &FileInfo) -> Result<()> {
        if self.exists_in_dest(key, file).await? {
            debug!("跳过已存在: {}/{}", folder.name, file.name);
            self.report.files_skipped += 1;
            return Ok(());
        }

        if self.dry_run {
            info!("[dry-run] 复制 {}/{}", folder.name, file.name);
            self.report.files_copied += 1;
            return Ok(());
        }

        let target = self.dest_files.get(key).and_then(|d| d.target.clone());
        info!(
            "复制 {}/{} -> {}",
            folder.name,
            file.name,
            target.as_deref().unwrap_or("")
        );
        self.src.copy_file(file, target.as_deref(), self.dest).await?;
        self.report.files_copied += 1;

        // 记录到目标索引，同一次运行中不会重复复制
        if let Some(dest) = self.dest_files.get_mut(key) {
            dest.copied.insert(file.name.to_lowercase());
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> WalkVisitor for SyncEngine<'a> {
    async fn folder(&mut self, _folder: &FolderInfo) -> Result<()> {
        Ok(())
    }

    async fn file(&mut self, record: &FileRecord<'_>) -> Result<()> {
        let (folder, file) = (record.folder, record.file);
        let key = self.load_dest_files(folder).await?;

        self.report.files_scanned += 1;
        match self.sync_file(folder, &key, file).await {
            Ok(()) => Ok(()),
            // 授权失败后任何调用都不会成功
            Err(e @ SyncError::Auth(_)) => Err(e),
            Err(e) => {
                error!(
                    "复制失败 {}/{} ({} -> {}): {}",
                    folder.name,
                    file.name,
                    self.src.name(),
                    self.dest.name(),
                    e
                );
                self.report.files_failed += 1;
                self.report
                    .errors
                    .push(format!("{}/{}: {}", folder.name, file.name, e));
                Ok(())
            }
        }
    }

    async fn finish(&mut self, elapsed: Duration) -> Result<()> {
        debug!("遍历耗时 {:?}", elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Filters;
    use crate::storage::testing::{file, file_with_checksum, StubBackend};
    use crate::storage::LocalBackend;
    use std::path::Path;

    fn options() -> WalkOptions {
        WalkOptions {
            root_files: true,
            ..Default::default()
        }
    }

    fn uploaded(dest: &StubBackend) -> Vec<String> {
        dest.uploads()
            .into_iter()
            .map(|(folder, name, _)| format!("{}/{}", folder.unwrap_or_default(), name))
            .collect()
    }

    #[tokio::test]
    async fn test_copies_missing_files() {
        let src = StubBackend::new("src")
            .folder("Holiday", vec![file("a.jpg"), file("b.jpg")])
            .root(vec![file("top.jpg")]);
        let dest = StubBackend::new("dest").folder("holiday", vec![file("A.JPG")]);

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        // 目标已有的文件夹沿用目标的写法
        assert_eq!(uploaded(&dest), vec!["/top.jpg", "holiday/b.jpg"]);
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.files_skipped, 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_copied() {
        let src = StubBackend::new("src").folder(
            "Holiday",
            vec![
                file_with_checksum("a.jpg", "111"),
                file_with_checksum("b.jpg", "222"),
                file("c.jpg"),
            ],
        );
        let dest = StubBackend::new("dest").folder(
            "Holiday",
            vec![
                file_with_checksum("a.jpg", "111"),
                file_with_checksum("b.jpg", "999"),
                file_with_checksum("c.jpg", "333"),
            ],
        );

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        assert_eq!(uploaded(&dest), vec!["Holiday/b.jpg"]);
        let checksums: Vec<_> = dest.uploads().into_iter().map(|(_, _, c)| c).collect();
        assert_eq!(checksums, vec![Some("222".to_string())]);
        assert_eq!(report.files_skipped, 2);
    }

    #[tokio::test]
    async fn test_dry_run_copies_nothing() {
        let src = StubBackend::new("src").folder("Holiday", vec![file("a.jpg")]);
        let dest = StubBackend::new("dest");

        let report = SyncEngine::new(&src, &dest, true).run(options()).await.unwrap();

        assert!(dest.uploads().is_empty());
        assert!(report.dry_run);
        assert_eq!(report.files_copied, 1);
    }

    #[tokio::test]
    async fn test_failures_continue_and_report() {
        let src = StubBackend::new("src")
            .folder("Holiday", vec![file("a.jpg"), file("b.jpg"), file("c.jpg")])
            .failing("b.jpg");
        let dest = StubBackend::new("dest");

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        assert_eq!(uploaded(&dest), vec!["Holiday/a.jpg", "Holiday/c.jpg"]);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_copied, 2);
        assert!(!report.is_success());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Holiday/b.jpg"));
    }

    #[tokio::test]
    async fn test_same_name_copied_once_per_run() {
        let src = StubBackend::new("src").folder("Holiday", vec![file("a.jpg"), file("A.jpg")]);
        let dest = StubBackend::new("dest");

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        assert_eq!(uploaded(&dest), vec!["Holiday/a.jpg"]);
        assert_eq!(report.files_skipped, 1);
    }

    fn local(root: &Path) -> LocalBackend {
        LocalBackend::new(root.to_str().unwrap(), Filters::default()).unwrap()
    }

    fn write(root: &Path, path: &str, content: &str) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_local_dest_content_is_compared() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        write(src_dir.path(), "Holiday/a.jpg", "NEW CONTENT");
        write(src_dir.path(), "Holiday/b.jpg", "same");
        write(dest_dir.path(), "Holiday/a.jpg", "old content");
        write(dest_dir.path(), "Holiday/b.jpg", "same");
        let (src, dest) = (local(src_dir.path()), local(dest_dir.path()));

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.files_skipped, 1);
        let copied = std::fs::read_to_string(dest_dir.path().join("Holiday/a.jpg")).unwrap();
        assert_eq!(copied, "NEW CONTENT");
    }

    #[tokio::test]
    async fn test_local_dest_folder_spelling_is_kept() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        write(src_dir.path(), "Holiday/b.jpg", "beach");
        write(src_dir.path(), "Work/c.jpg", "desk");
        write(dest_dir.path(), "holiday/a.jpg", "dunes");
        let (src, dest) = (local(src_dir.path()), local(dest_dir.path()));

        let report = SyncEngine::new(&src, &dest, false).run(options()).await.unwrap();

        assert_eq!(report.files_copied, 2);
        let mut dirs: Vec<String> = std::fs::read_dir(dest_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        assert_eq!(dirs, vec!["Work", "holiday"]);
        assert!(dest_dir.path().join("holiday/b.jpg").is_file());
        assert!(dest_dir.path().join("Work/c.jpg").is_file());
    }
}
