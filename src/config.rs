//! 应用配置模块
//!
//! 优先级：内置默认值 < JSON 配置文件 < 命令行参数。

use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use crate::storage::NameFilter;
use clap::{Parser, ValueEnum};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件名（放在程序所在目录）
pub const CONFIG_FILENAME: &str = "photosync.json";

/// 列表输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    #[default]
    Tree,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 源：本地目录、`flickr` 或 `fake`
    pub src: String,
    /// 目标，为空时只列出源
    pub dest: String,
    pub list_only: bool,
    pub list_format: ListFormat,
    pub list_sort: bool,
    /// 只列出文件夹
    pub list_folders: bool,
    pub include: String,
    pub include_dir: String,
    pub exclude: String,
    pub exclude_dir: String,
    pub root_files: bool,
    pub dry_run: bool,
    /// 每次网络调用前的延迟（秒，可为小数）
    pub throttling: f64,
    pub retry: u32,
    pub api_key: String,
    pub api_secret: String,
    /// 上传时附加的标签，空格分隔
    pub tags: String,
    pub is_public: bool,
    pub is_friend: bool,
    pub is_family: bool,
    pub verbose: bool,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            src: String::new(),
            dest: String::new(),
            list_only: false,
            list_format: ListFormat::Tree,
            list_sort: false,
            list_folders: false,
            include: r"\.(jpg|png|avi|mov|mpg|mp4|3gp)$".to_string(),
            include_dir: String::new(),
            exclude: String::new(),
            exclude_dir: String::new(),
            root_files: false,
            dry_run: false,
            throttling: 0.5,
            retry: 7,
            api_key: String::new(),
            api_secret: String::new(),
            tags: "flickr-rsync".to_string(),
            is_public: false,
            is_friend: false,
            is_family: false,
            verbose: false,
            log: LogConfig::default(),
        }
    }
}

/// 编译好的文件/文件夹过滤器
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub files: NameFilter,
    pub folders: NameFilter,
}

/// 命令行参数
#[derive(Debug, Default, Parser)]
#[command(
    name = "photosync",
    version,
    about = "Synchronise a local directory of photos with a remote photo service"
)]
pub struct Cli {
    /// 源目录，或 flickr / fake
    pub src: Option<String>,
    /// 目标目录，或 flickr / fake
    pub dest: Option<String>,

    /// 配置文件路径，默认使用程序目录下的 photosync.json
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 只列出源中的文件，不复制
    #[arg(short, long)]
    pub list_only: bool,
    #[arg(long, value_enum)]
    pub list_format: Option<ListFormat>,
    /// 按名称排序（会缓冲整个远程列表）
    #[arg(long)]
    pub list_sort: bool,
    /// 只列出文件夹
    #[arg(long)]
    pub list_folders: bool,

    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,
    #[arg(long, value_name = "REGEX")]
    pub include_dir: Option<String>,
    /// 优先于 --include
    #[arg(long, value_name = "REGEX")]
    pub exclude: Option<String>,
    /// 优先于 --include-dir
    #[arg(long, value_name = "REGEX")]
    pub exclude_dir: Option<String>,
    /// 包含不在任何文件夹中的文件
    #[arg(long)]
    pub root_files: bool,
    /// 只模拟，不实际复制
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    #[arg(long, value_name = "SEC")]
    pub throttling: Option<f64>,
    #[arg(long, value_name = "NUM")]
    pub retry: Option<u32>,

    #[arg(long, env = "PHOTOSYNC_API_KEY")]
    pub api_key: Option<String>,
    #[arg(long, env = "PHOTOSYNC_API_SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,
    #[arg(long, value_name = "\"TAG1 TAG2\"")]
    pub tags: Option<String>,
    #[arg(long)]
    pub public: bool,
    #[arg(long)]
    pub friend: bool,
    #[arg(long)]
    pub family: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

/// 编译大小写不敏感的正则，空字符串表示不过滤
fn compile(pattern: &str, option: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| SyncError::Config(format!("{} 不是有效的正则: {}", option, e)))
}

/// 程序所在目录
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AppConfig {
    /// 从 JSON 文件加载；`path` 为空时读取默认位置，文件不存在则使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (exe_dir().join(CONFIG_FILENAME), false),
        };

        if !path.is_file() {
            if required {
                return Err(SyncError::Config(format!("配置文件不存在: {:?}", path)));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("无法解析配置文件 {:?}: {}", path, e)))?;
        tracing::debug!("已加载配置文件: {:?}", path);
        Ok(config)
    }

    /// 用命令行参数覆盖
    pub fn merge_cli(&mut self, cli: &Cli) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut self.src, &cli.src);
        set(&mut self.dest, &cli.dest);
        set(&mut self.list_format, &cli.list_format);
        set(&mut self.include, &cli.include);
        set(&mut self.include_dir, &cli.include_dir);
        set(&mut self.exclude, &cli.exclude);
        set(&mut self.exclude_dir, &cli.exclude_dir);
        set(&mut self.throttling, &cli.throttling);
        set(&mut self.retry, &cli.retry);
        set(&mut self.api_key, &cli.api_key);
        set(&mut self.api_secret, &cli.api_secret);
        set(&mut self.tags, &cli.tags);

        self.list_only |= cli.list_only;
        self.list_sort |= cli.list_sort;
        self.list_folders |= cli.list_folders;
        self.root_files |= cli.root_files;
        self.dry_run |= cli.dry_run;
        self.is_public |= cli.public;
        self.is_friend |= cli.friend;
        self.is_family |= cli.family;
        self.verbose |= cli.verbose;
    }

    /// 没有目标时只列出源
    pub fn is_list_mode(&self) -> bool {
        self.list_only || self.dest.trim().is_empty()
    }

    /// 校验配置并编译过滤器
    pub fn validate(&self) -> Result<Filters> {
        if self.src.trim().is_empty() {
            return Err(SyncError::Config("必须指定源".to_string()));
        }
        if !self.throttling.is_finite() || self.throttling < 0.0 {
            return Err(SyncError::Config(format!(
                "throttling 必须是非负数: {}",
                self.throttling
            )));
        }
        if !self.is_list_mode() && self.src.trim().eq_ignore_ascii_case(self.dest.trim()) {
            return Err(SyncError::Config("源和目标不能相同".to_string()));
        }

        Ok(Filters {
            files: NameFilter::new(
                compile(&self.include, "--include")?,
                compile(&self.exclude, "--exclude")?,
            ),
            folders: NameFilter::new(
                compile(&self.include_dir, "--include-dir")?,
                compile(&self.exclude_dir, "--exclude-dir")?,
            ),
        })
    }
}
