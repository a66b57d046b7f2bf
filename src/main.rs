use anyhow::{Context, Result};
use batch_labeler::export::StatsDocument;
use batch_labeler::services::report::render_report;
use batch_labeler::services::CheckpointStore;
use batch_labeler::utils::logging::init_tracing;
use batch_labeler::{Config, LabelingController, LlmLabelingService};
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "batch-labeler", version, about = "可断点续跑的批量标注工具")]
struct Cli {
    /// TOML 配置文件，不提供时从环境变量读取
    #[arg(long, global = true, env = "LABELER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 开始（或继续）标注一个数据集
    Run {
        /// 数据集名称（dataset_dir 下的文件名，可省略扩展名）
        #[arg(long)]
        dataset: String,
        /// 每批行数
        #[arg(long)]
        batch_width: Option<usize>,
        /// 同时处理部分完成的批次
        #[arg(long)]
        force_partial: bool,
        /// 接受部分合法的响应
        #[arg(long)]
        relaxed: bool,
        /// 进度刷新间隔（秒）
        #[arg(long, default_value_t = 10)]
        refresh_secs: u64,
    },
    /// 查看断点进度（只读）
    Progress {
        #[arg(long)]
        dataset: String,
    },
    /// 打印最近一次导出的请求统计
    Stats,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::from_env());
    };
    let mut config = Config::from_toml_file(path)?;
    if config.api_keys.is_empty() {
        config.api_keys = Config::from_env().api_keys;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            dataset,
            batch_width,
            force_partial,
            relaxed,
            refresh_secs,
        } => {
            if let Some(width) = batch_width {
                config.batch_width = width;
            }
            config.force_partial |= force_partial;
            config.relaxed_validation |= relaxed;
            run(config, &dataset, Duration::from_secs(refresh_secs.max(1))).await
        }
        Command::Progress { dataset } => {
            let store = CheckpointStore::new(&config);
            match store.progress(&dataset)? {
                Some(p) => println!(
                    "{}: {}/{} ({:.1}%)，剩余 {} 行",
                    dataset,
                    p.completed,
                    p.total,
                    p.percent,
                    p.remaining()
                ),
                None => println!("{}: 还没有断点文件", dataset),
            }
            Ok(())
        }
        Command::Stats => {
            let doc = StatsDocument::read_from(&config.stats_file).with_context(|| {
                format!("读取统计文件失败: {}", config.stats_file.display())
            })?;
            println!("{}", render_report(&doc));
            Ok(())
        }
    }
}

async fn run(config: Config, dataset: &str, refresh: Duration) -> Result<()> {
    // 初始化日志（guard 持有到程序结束）
    let _guard = init_tracing(&config.log_dir)?;

    config.validate()?;
    let width = NonZeroUsize::new(config.batch_width).context("batch_width 必须大于 0")?;

    let service = Arc::new(LlmLabelingService::new(&config));
    let controller = Arc::new(LabelingController::new(config.clone(), service));

    let started = controller
        .start(dataset, width, config.retry_policy())
        .await
        .context("启动标注失败")?;
    info!(
        "📂 断点文件: {} ({} 个批次待处理)",
        started.artifact.display(),
        started.plan.batches.len()
    );

    // Ctrl-C → 协作式停止
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⏹️ 收到 Ctrl-C，当前调用完成后停止");
                let _ = controller.stop().await;
            }
        });
    }

    // 显示任务只读
    let display = {
        let controller = controller.clone();
        let dataset = dataset.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !controller.is_running().await {
                    break;
                }
                if let Ok(Some(p)) = controller.progress(&dataset).await {
                    info!("📊 进度: {}/{} ({:.1}%)", p.completed, p.total, p.percent);
                }
                let stats = controller.stats().await;
                if !stats.stale {
                    info!(
                        "📈 请求: {} 次，成功率 {:.1}%，{:.2} 次/分钟",
                        stats.overall.requests,
                        stats.overall.success_rate,
                        stats.requests_per_minute
                    );
                }
            }
        })
    };

    let result = controller.wait().await;
    display.abort();

    let doc = StatsDocument::collect(&controller.tracker()).await;
    println!("{}", render_report(&doc));

    let summary = result.context("标注运行失败")?;
    if summary.rows_incomplete > 0 {
        info!(
            "💡 仍有 {} 行未完成，再次运行即可从断点继续",
            summary.rows_incomplete
        );
    }
    Ok(())
}
