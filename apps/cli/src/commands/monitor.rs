//! 监听命令（RX_SETUP）
//!
//! 订阅一个 CAN ID，打印内核发来的每条通知，直到 Ctrl-C。

use super::{describe_frame, install_ctrlc};
use crate::validation::parse_can_id;
use anyhow::{Context, Result};
use bcm_driver::{ChannelHandler, Connector, ConnectorConfig};
use bcm_protocol::BcmMessage;
use clap::Args;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 监听命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 订阅的 CAN ID（十六进制）
    #[arg(long)]
    pub id: String,

    /// 订阅 CAN FD 帧
    #[arg(long)]
    pub fd: bool,

    /// 超过该时间未收到帧时内核发送 RX_TIMEOUT（毫秒，0 关闭）
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,

    /// RX_CHANGED 通知的最小间隔（毫秒，0 不限制）
    #[arg(long, default_value_t = 0)]
    pub throttle_ms: u64,

    /// 以 JSON Lines 输出
    #[arg(long)]
    pub json: bool,

    /// 入站消息缓冲容量（满时丢弃）
    #[arg(long, default_value_t = 1024)]
    pub buffer: usize,
}

/// JSON 输出中的一帧
#[derive(Debug, Serialize)]
struct JsonFrame {
    id: u32,
    extended: bool,
    len: usize,
    data: String,
}

/// JSON 输出中的一条通知
#[derive(Debug, Serialize)]
struct JsonMessage {
    timestamp_us: u64,
    opcode: &'static str,
    can_id: u32,
    fd: bool,
    frames: Vec<JsonFrame>,
}

impl JsonMessage {
    fn from_message(message: &BcmMessage, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            opcode: message.opcode().name(),
            can_id: message.can_id(),
            fd: message.is_fd(),
            frames: message
                .frames
                .iter()
                .map(|frame| JsonFrame {
                    id: frame.raw_id() & bcm_protocol::CAN_EFF_MASK,
                    extended: frame.raw_id() & bcm_protocol::CAN_EFF_FLAG != 0,
                    len: frame.len(),
                    data: hex::encode_upper(frame.data()),
                })
                .collect(),
        }
    }
}

impl MonitorCommand {
    pub fn execute(&self, config: ConnectorConfig) -> Result<()> {
        let can_id = parse_can_id(&self.id)?;
        if self.buffer == 0 {
            anyhow::bail!("--buffer 必须大于 0");
        }

        let running = install_ctrlc()?;

        let interface = config.interface.clone();
        let (handler, messages, dropped) = ChannelHandler::new(self.buffer);
        let connector =
            Connector::open(config, handler).with_context(|| format!("无法打开接口 {}", interface))?;
        connector.rx_setup_filter(
            can_id,
            self.fd,
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.throttle_ms),
        )?;

        if !self.json {
            println!("👂 监听 {} 上的 0x{:X}（按 Ctrl-C 停止）", interface, can_id);
        }

        let mut received = 0u64;
        while running.load(Ordering::SeqCst) {
            let message = match messages.recv_timeout(Duration::from_millis(100)) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            received += 1;

            if self.json {
                let timestamp_us = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros() as u64;
                let line = serde_json::to_string(&JsonMessage::from_message(&message, timestamp_us))?;
                println!("{}", line);
            } else {
                print_message(&message);
            }
        }

        connector.shutdown()?;

        if !self.json {
            let metrics = connector.metrics();
            println!(
                "📊 收到 {} 条通知，丢弃 {} 条（缓冲区满），畸形数据报 {} 个",
                received,
                dropped.get(),
                metrics.rx_discarded
            );
        }
        Ok(())
    }
}

fn print_message(message: &BcmMessage) {
    let frames: Vec<String> = message.frames.iter().map(|f| describe_frame(&f)).collect();
    if frames.is_empty() {
        println!("{:<12} 0x{:X}", message.opcode().name(), message.can_id());
    } else {
        println!(
            "{:<12} 0x{:X}  {}",
            message.opcode().name(),
            message.can_id(),
            frames.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_protocol::{BcmFrames, BcmMsgHead, CanFrame, Opcode};

    #[test]
    fn test_json_message_shape() {
        let message = BcmMessage {
            head: BcmMsgHead::new(Opcode::RxChanged, 0x123),
            frames: BcmFrames::Classic(vec![CanFrame::new_standard(0x123, &[0xCA, 0xFE]).unwrap()]),
        };
        let json = serde_json::to_value(JsonMessage::from_message(&message, 42)).unwrap();
        assert_eq!(json["opcode"], "RX_CHANGED");
        assert_eq!(json["can_id"], 0x123);
        assert_eq!(json["fd"], false);
        assert_eq!(json["timestamp_us"], 42);
        assert_eq!(json["frames"][0]["data"], "CAFE");
        assert_eq!(json["frames"][0]["len"], 2);
        assert_eq!(json["frames"][0]["extended"], false);
    }
}
