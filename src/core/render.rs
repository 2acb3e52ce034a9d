//! 列表输出：CSV 和树形

use super::walker::{FileRecord, WalkVisitor};
use crate::error::Result;
use crate::storage::FolderInfo;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;

const BRANCH: &str = "├─── ";
const LAST_BRANCH: &str = "└─── ";

/// 逗号分隔输出，缺失的校验和写作 `None`
pub struct CsvRenderer<W> {
    out: W,
}

impl<W: Write + Send> CsvRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> WalkVisitor for CsvRenderer<W> {
    async fn begin(&mut self, folders_only: bool) -> Result<()> {
        if folders_only {
            writeln!(self.out, "Folder")?;
        } else {
            writeln!(self.out, "Folder, Filename, Checksum")?;
        }
        Ok(())
    }

    async fn folder(&mut self, folder: &FolderInfo) -> Result<()> {
        writeln!(self.out, "{}", folder.name)?;
        Ok(())
    }

    async fn file(&mut self, record: &FileRecord<'_>) -> Result<()> {
        writeln!(
            self.out,
            "{}, {}, {}",
            record.folder.name,
            record.file.name,
            record.file.checksum.as_deref().unwrap_or("None")
        )?;
        Ok(())
    }

    async fn finish(&mut self, _elapsed: Duration) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// 树形输出：文件夹名一行，文件缩进在下面
///
/// 根文件夹没有名字，它的文件直接输出在顶层。
pub struct TreeRenderer<W> {
    out: W,
}

impl<W: Write + Send> TreeRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> WalkVisitor for TreeRenderer<W> {
    async fn folder(&mut self, folder: &FolderInfo) -> Result<()> {
        if !folder.is_root() {
            writeln!(self.out, "{}", folder.name)?;
        }
        Ok(())
    }

    async fn file(&mut self, record: &FileRecord<'_>) -> Result<()> {
        let indent = !record.folder.is_root();
        if indent && record.first {
            writeln!(self.out, "{}", record.folder.name)?;
        }

        let prefix = match (indent, record.last) {
            (false, _) => "",
            (true, false) => BRANCH,
            (true, true) => LAST_BRANCH,
        };
        match &record.file.checksum {
            Some(sum) => writeln!(self.out, "{}{} [{}]", prefix, record.file.name, sum)?,
            None => writeln!(self.out, "{}{}", prefix, record.file.name)?,
        }
        Ok(())
    }

    async fn finish(&mut self, _elapsed: Duration) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
