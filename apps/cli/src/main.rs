//! # MRF CLI
//!
//! MRF 无线 dongle 的命令行工具。
//!
//! ```bash
//! # 烧写 PIC 固件到 3 号机器人
//! mrf-cli upload --robot 3 --image firmware.bin
//!
//! # 每 500 ms 打印一次遥测
//! mrf-cli monitor
//!
//! # dongle 蜂鸣
//! mrf-cli beep --ms 200
//! ```
//!
//! 配置文件默认位于 `$XDG_CONFIG_HOME/mrf/dongle.toml`，之后应用
//! `MRF_CHANNEL` / `MRF_SYMBOL_RATE` / `MRF_PAN` / `MRF_SERIAL` 环境变量。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mrf_driver::DongleConfig;
use std::path::PathBuf;

mod commands;

use commands::{BeepCommand, MonitorCommand, UploadCommand};

/// MRF CLI - 机器人无线 dongle 工具
#[derive(Parser, Debug)]
#[command(name = "mrf-cli")]
#[command(about = "Command-line tool for the MRF robot radio dongle", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 $XDG_CONFIG_HOME/mrf/dongle.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 烧写固件或 FPGA 比特流
    Upload {
        #[command(flatten)]
        args: UploadCommand,
    },

    /// 监控机器人遥测
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// dongle 蜂鸣
    Beep {
        #[command(flatten)]
        args: BeepCommand,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mrf").join("dongle.toml"))
}

/// 加载配置：显式路径必须存在，默认路径不存在时用默认值
fn load_config(path: Option<PathBuf>) -> Result<DongleConfig> {
    let mut config = match path {
        Some(path) => DongleConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match default_config_path() {
            Some(path) if path.exists() => DongleConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            _ => DongleConfig::default(),
        },
    };
    config
        .apply_env()
        .context("Invalid MRF_* environment override")?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mrf_cli=info,mrf_driver=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Upload { args } => args.execute(config),
        Commands::Monitor { args } => args.execute(config),
        Commands::Beep { args } => args.execute(config),
    }
}
