use anyhow::Context;
use clap::Parser;
use photosync_lib::config::{AppConfig, Cli, Filters, ListFormat};
use photosync_lib::core::{CsvRenderer, SyncEngine, TreeRenderer, WalkOptions, Walker};
use photosync_lib::logging::{get_log_dir, init_logging};
use photosync_lib::storage::create_backend;
use photosync_lib::SyncError;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use tracing::{error, warn};

/// 配置错误的退出码
const EXIT_CONFIG: u8 = 2;
/// 有文件失败或运行中断的退出码
const EXIT_FAILURE: u8 = 1;

fn load_config(cli: &Cli) -> anyhow::Result<(AppConfig, Filters)> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.merge_cli(cli);
    let filters = config.validate()?;
    Ok((config, filters))
}

/// 返回是否全部成功
async fn run(config: &AppConfig, filters: &Filters) -> anyhow::Result<bool> {
    let src = create_backend(&config.src, config, filters)
        .with_context(|| format!("无法打开源 {}", config.src))?;
    let options = WalkOptions {
        root_files: config.root_files,
        sort: config.list_sort,
        folders_only: config.list_folders,
    };

    if config.is_list_mode() {
        let walker = Walker::new(src.as_ref(), options);
        let out = BufWriter::new(io::stdout());
        match config.list_format {
            ListFormat::Tree => walker.walk(&mut TreeRenderer::new(out)).await?,
            ListFormat::Csv => walker.walk(&mut CsvRenderer::new(out)).await?,
        };
        return Ok(true);
    }

    let dest = create_backend(&config.dest, config, filters)
        .with_context(|| format!("无法打开目标 {}", config.dest))?;
    let report = SyncEngine::new(src.as_ref(), dest.as_ref(), config.dry_run)
        .run(options)
        .await?;

    for e in &report.errors {
        warn!("失败: {}", e);
    }
    Ok(report.is_success())
}

fn is_config_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<SyncError>(), Some(SyncError::Config(_)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, filters) = match load_config(&cli) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config.log, config.verbose, &get_log_dir());

    match run(&config, &filters).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURE),
        Err(e) if is_config_error(&e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
