//! # BCM CLI
//!
//! Command-line interface for the CAN Broadcast Manager connector.
//!
//! ```bash
//! # 发送单帧
//! bcm-cli --interface vcan0 send --id 0x123 --data DEADBEEF
//!
//! # 安装周期任务：先以 500us 发送 3 次，然后每 100ms 一次，运行 10 秒后删除
//! bcm-cli cyclic --id 0x567 --data 0011223344556677 --fd \
//!     --count 3 --ival1-us 500 --ival2-ms 100 --duration-s 10
//!
//! # 订阅并打印通知（JSON Lines）
//! bcm-cli monitor --id 0x123 --json
//! ```
//!
//! 日志级别通过 `RUST_LOG` 控制（默认 `bcm_cli=info`）。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod validation;

use commands::{CyclicCommand, MonitorCommand, SendCommand, load_config};

/// BCM CLI - CAN Broadcast Manager 命令行工具
#[derive(Parser, Debug)]
#[command(name = "bcm-cli")]
#[command(about = "Command-line interface for the CAN Broadcast Manager connector", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CAN 接口（覆盖配置文件）
    #[arg(short, long, global = true)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 发送单帧（TX_SEND）
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 安装周期发送任务，退出时删除（TX_SETUP / TX_DELETE）
    Cyclic {
        #[command(flatten)]
        args: CyclicCommand,
    },

    /// 订阅 CAN ID 并打印内核通知（RX_SETUP）
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bcm_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.interface.as_deref())?;

    match cli.command {
        Commands::Send { args } => args.execute(config),
        Commands::Cyclic { args } => args.execute(config),
        Commands::Monitor { args } => args.execute(config),
    }
}
