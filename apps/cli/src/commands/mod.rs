//! 命令定义和实现

pub mod cyclic;
pub mod monitor;
pub mod send;

pub use cyclic::CyclicCommand;
pub use monitor::MonitorCommand;
pub use send::SendCommand;

use crate::validation::{FrameSpec, build_frame, parse_can_id, parse_data};
use anyhow::{Context, Result};
use bcm_driver::{BcmHandler, ConnectorConfig, RequestId, SendCompletion};
use bcm_protocol::{BcmMessage, Frame};
use clap::Args;
use crossbeam_channel::{Receiver, Sender};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 帧参数（send / cyclic 共用）
#[derive(Args, Debug, Clone)]
pub struct FrameArgs {
    /// CAN ID（十六进制，如 0x123）
    #[arg(long)]
    pub id: String,

    /// 数据（十六进制，如 DEADBEEF 或 de:ad:be:ef）
    #[arg(long, default_value = "")]
    pub data: String,

    /// 发送 CAN FD 帧
    #[arg(long)]
    pub fd: bool,

    /// 29-bit 扩展帧
    #[arg(long)]
    pub extended: bool,

    /// FD 比特率切换（需要 --fd）
    #[arg(long)]
    pub brs: bool,
}

impl FrameArgs {
    pub fn to_frame(&self) -> Result<Frame> {
        let id = parse_can_id(&self.id)?;
        let data = parse_data(&self.data)?;
        build_frame(
            id,
            &data,
            FrameSpec {
                extended: self.extended,
                fd: self.fd,
                brs: self.brs,
            },
        )
    }
}

/// 加载配置（`--config` 文件，随后 `--interface` 覆盖）
pub fn load_config(path: Option<&Path>, interface: Option<&str>) -> Result<ConnectorConfig> {
    let mut config = match path {
        Some(path) => ConnectorConfig::load(path)
            .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
        None => ConnectorConfig::default(),
    };
    if let Some(interface) = interface {
        config.interface = interface.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// 注册 Ctrl-C，返回运行标志
pub fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("\n收到退出信号，正在关闭...");
    })
    .context("注册 Ctrl-C 处理失败")?;
    Ok(running)
}

/// 把发送完成结果转发给命令线程的 handler
pub struct CompletionHandler {
    sender: Sender<(RequestId, Result<usize, String>)>,
}

impl CompletionHandler {
    pub fn new() -> (Self, Receiver<(RequestId, Result<usize, String>)>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl BcmHandler for CompletionHandler {
    fn on_message(&mut self, message: &BcmMessage) {
        tracing::debug!("{} can_id=0x{:X}", message.opcode(), message.can_id());
    }

    fn on_send_complete(&mut self, completion: &SendCompletion) {
        let result = completion
            .result
            .as_ref()
            .copied()
            .map_err(|e| e.to_string());
        let _ = self.sender.send((completion.id, result));
    }
}

/// 等待指定请求的完成结果
pub fn wait_completion(
    completions: &Receiver<(RequestId, Result<usize, String>)>,
    id: RequestId,
    timeout: Duration,
) -> Result<usize> {
    loop {
        let (completed, result) = completions
            .recv_timeout(timeout)
            .with_context(|| format!("请求 {} 在 {:?} 内未完成", id, timeout))?;
        if completed == id {
            return result.map_err(|e| anyhow::anyhow!("请求 {} 失败: {}", id, e));
        }
    }
}

/// 帧的简短描述（用于终端输出）
pub fn describe_frame(frame: &Frame) -> String {
    format!(
        "0x{:X} [{}] {}{}",
        frame.raw_id() & bcm_protocol::CAN_EFF_MASK,
        frame.len(),
        hex::encode_upper(frame.data()),
        if frame.kind().is_fd() { " (FD)" } else { "" }
    )
}
