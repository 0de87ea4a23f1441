//! 周期发送命令（TX_SETUP / TX_DELETE）
//!
//! 安装周期任务后等待指定时长或 Ctrl-C，然后删除任务。

use super::{CompletionHandler, FrameArgs, describe_frame, install_ctrlc, wait_completion};
use anyhow::{Context, Result};
use bcm_driver::{Connector, ConnectorConfig};
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 周期发送命令参数
#[derive(Args, Debug)]
pub struct CyclicCommand {
    #[command(flatten)]
    pub frame: FrameArgs,

    /// 以 ival1 发送的次数（0 表示直接使用 ival2）
    #[arg(long, default_value_t = 0)]
    pub count: u32,

    /// 第一阶段间隔（微秒）
    #[arg(long, default_value_t = 0)]
    pub ival1_us: u64,

    /// 稳态周期（毫秒）
    #[arg(long)]
    pub ival2_ms: u64,

    /// 运行时长（秒），0 表示直到 Ctrl-C
    #[arg(long, default_value_t = 0)]
    pub duration_s: u64,
}

impl CyclicCommand {
    pub fn execute(&self, config: ConnectorConfig) -> Result<()> {
        let frame = self.frame.to_frame()?;
        if self.count > 0 && self.ival1_us == 0 {
            anyhow::bail!("--count > 0 时需要 --ival1-us");
        }
        if self.ival2_ms == 0 && self.count == 0 {
            anyhow::bail!("--ival2-ms 必须大于 0");
        }

        let running = install_ctrlc()?;

        println!("🔌 打开 {} 上的 BCM socket...", config.interface);
        let interface = config.interface.clone();
        let (handler, completions) = CompletionHandler::new();
        let connector =
            Connector::open(config, handler).with_context(|| format!("无法打开接口 {}", interface))?;

        let ival1 = Duration::from_micros(self.ival1_us);
        let ival2 = Duration::from_millis(self.ival2_ms);
        let id = connector.tx_setup_cyclic(&[frame], self.count, ival1, ival2, self.frame.fd)?;
        wait_completion(&completions, id, Duration::from_secs(2))?;

        println!("✅ 周期任务已安装: {}", describe_frame(&frame));
        if self.count > 0 {
            println!("   先以 {:?} 发送 {} 次，然后每 {:?} 一次", ival1, self.count, ival2);
        } else {
            println!("   每 {:?} 一次", ival2);
        }
        println!("   按 Ctrl-C 停止");

        let start = Instant::now();
        let limit = Duration::from_secs(self.duration_s);
        while running.load(Ordering::SeqCst) {
            if self.duration_s > 0 && start.elapsed() >= limit {
                println!("⏱️  达到时长限制");
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let task_id = frame.raw_id();
        let delete = connector.tx_delete_cyclic(task_id, self.frame.fd)?;
        wait_completion(&completions, delete, Duration::from_secs(2))?;
        connector.shutdown()?;

        println!("✅ 周期任务已删除（运行 {:.1}s）", start.elapsed().as_secs_f64());
        Ok(())
    }
}
