use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use repo_grader::{logger, App, Config, RunPaths};

#[derive(Parser)]
#[command(name = "repo_grader")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grade student GitHub repositories against a rubric with an LLM", long_about = None)]
struct Cli {
    /// Rubric file (JSON, TOML or plain text)
    #[arg(long)]
    rubric: PathBuf,

    /// Roster file (TOML `[[students]]` or JSON)
    #[arg(long)]
    roster: PathBuf,

    /// Optional TOML config; environment variables still override it
    #[arg(long, env = "REPO_GRADER_CONFIG")]
    config: Option<PathBuf>,

    /// Cumulative JSON report
    #[arg(long)]
    output: Option<String>,

    /// JSON Lines error log
    #[arg(long)]
    errors: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent analyzers per batch
    #[arg(long)]
    slots: Option<usize>,

    /// Per-batch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// 命令行参数优先级最高
    fn apply(&self, mut config: Config) -> Config {
        if let Some(path) = &self.output {
            config.results_path = path.clone();
        }
        if let Some(path) = &self.errors {
            config.error_log_path = path.clone();
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.slots {
            config.analyzer_slots = n;
        }
        if let Some(secs) = self.timeout {
            config.batch_timeout_secs = secs;
        }
        config.verbose_logging |= self.verbose;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load(cli.config.as_deref()).context("加载配置失败")?;
    let config = cli.apply(config);

    // 初始化日志
    logger::init(config.verbose_logging);

    let paths = RunPaths {
        roster: cli.roster.clone(),
        rubric: cli.rubric.clone(),
    };

    // 初始化并运行应用
    let app = App::initialize(config, paths).context("初始化失败")?;
    app.run().await.context("加载名单或评分标准失败")?;

    Ok(())
}
