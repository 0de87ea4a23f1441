//! # 连接器配置
//!
//! 可以在代码中构建，也可以从 TOML 文件加载（缺省字段取默认值）：
//!
//! ```toml
//! interface = "can0"
//! max_frames = 64
//! require_interface_up = true
//! poll_interval_ms = 20
//! ```

use crate::error::ConnectorError;
use bcm_protocol::MAX_NFRAMES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 内核接口名上限（`IFNAMSIZ - 1`）
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// 连接器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// CAN 接口名（如 `can0`、`vcan0`）
    pub interface: String,

    /// 单条 TX_SETUP 允许的最大帧数（1..=256）
    pub max_frames: usize,

    /// 接口未 UP 时是否拒绝启动
    pub require_interface_up: bool,

    /// reactor 轮询超时（毫秒），也是 WouldBlock 后的最长重试间隔
    pub poll_interval_ms: u64,

    /// 单次 poll 的事件容量
    pub event_capacity: usize,

    /// reactor 线程名
    pub thread_name: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
            max_frames: MAX_NFRAMES,
            require_interface_up: true,
            poll_interval_ms: 50,
            event_capacity: 64,
            thread_name: "bcm-reactor".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// 使用指定接口、其余取默认值
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    /// 检查取值范围
    ///
    /// # 错误
    /// - `ConnectorError::Config`: 任一字段越界
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.interface.is_empty() || self.interface.len() > MAX_INTERFACE_NAME_LEN {
            return Err(ConnectorError::Config(format!(
                "interface name must be 1..={} bytes, got '{}'",
                MAX_INTERFACE_NAME_LEN, self.interface
            )));
        }
        if self.max_frames == 0 || self.max_frames > MAX_NFRAMES {
            return Err(ConnectorError::Config(format!(
                "max_frames must be in 1..={}, got {}",
                MAX_NFRAMES, self.max_frames
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConnectorError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConnectorError::Config(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConnectorError::Config("thread_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// 解析 TOML 文本并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConnectorError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConnectorError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    ///
    /// # 错误
    /// - `ConnectorError::Config`: 文件无法读取、解析失败或字段越界
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConnectorError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConnectorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, ConnectorError> {
        toml::to_string(self).map_err(|e| ConnectorError::Config(format!("TOML encode error: {}", e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
