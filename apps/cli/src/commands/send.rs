//! 单帧发送命令（TX_SEND）

use super::{CompletionHandler, FrameArgs, describe_frame, wait_completion};
use anyhow::{Context, Result};
use bcm_driver::{Connector, ConnectorConfig};
use clap::Args;
use std::time::Duration;

/// 单帧发送命令参数
#[derive(Args, Debug)]
pub struct SendCommand {
    #[command(flatten)]
    pub frame: FrameArgs,

    /// 重复发送次数（每次一条独立的 TX_SEND）
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
}

impl SendCommand {
    pub fn execute(&self, config: ConnectorConfig) -> Result<()> {
        let frame = self.frame.to_frame()?;
        if self.repeat == 0 {
            anyhow::bail!("--repeat 必须大于 0");
        }

        println!("🔌 打开 {} 上的 BCM socket...", config.interface);
        let interface = config.interface.clone();
        let (handler, completions) = CompletionHandler::new();
        let connector =
            Connector::open(config, handler).with_context(|| format!("无法打开接口 {}", interface))?;

        let frames = vec![frame; self.repeat];
        let ids = connector.tx_send_multiple(&frames, self.frame.fd)?;

        let mut failed = 0;
        for id in ids {
            if let Err(e) = wait_completion(&completions, id, Duration::from_secs(2)) {
                eprintln!("❌ {}", e);
                failed += 1;
            }
        }
        connector.shutdown()?;

        if failed > 0 {
            anyhow::bail!("{} / {} 条发送失败", failed, self.repeat);
        }
        println!("✅ 已发送 {} × {}", self.repeat, describe_frame(&frame));
        Ok(())
    }
}
