//! 校验和标签
//!
//! 远程服务没有保存内容哈希的字段，所以把 MD5 写进照片的标签里：
//! 标签列表以空格分隔，其中一个保留标签形如 `checksum:md5=<value>`。
//! 这个约定必须保持不变，否则无法识别以前同步过的远程文件。

use crate::error::Result;
use md5::{Digest, Md5};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 保留标签的键
pub const CHECKSUM_PREFIX: &str = "checksum:md5";

const READ_BUF_SIZE: usize = 64 * 1024;

/// 在基础标签后追加校验和标签；没有校验和时原样返回
pub fn encode_tags(base_tags: &str, checksum: Option<&str>) -> String {
    match checksum {
        Some(sum) if !sum.is_empty() => {
            format!("{} {}={}", base_tags, CHECKSUM_PREFIX, sum)
                .trim()
                .to_string()
        }
        _ => base_tags.trim().to_string(),
    }
}

/// 从标签中取出校验和，第一个匹配的生效
///
/// 无关标签和格式错误的标签都直接忽略。
pub fn decode_checksum<'a, I>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter_map(|tag| tag.split_once('='))
        .find(|(key, value)| *key == CHECKSUM_PREFIX && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// 计算本地文件内容的 MD5（十六进制小写）
pub async fn md5_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
