//! 连接器性能指标模块
//!
//! 原子计数器，reactor 线程写入，任意线程读取快照，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 连接器实时指标
///
/// # 使用示例
///
/// ```rust
/// use bcm_driver::ConnectorMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ConnectorMetrics::new();
/// metrics.tx_submitted.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.tx_in_flight(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    /// 已提交的发送数（连接器线程侧计数）
    pub tx_submitted: AtomicU64,
    /// 成功写入内核的发送数
    pub tx_completed: AtomicU64,
    /// 写入失败的发送数（不重试）
    pub tx_failed: AtomicU64,
    /// 关闭时仍未发出、被取消的发送数
    pub tx_cancelled: AtomicU64,
    /// 发送遇到 WouldBlock 的次数（socket 发送缓冲区满）
    pub tx_would_block: AtomicU64,

    /// 收到的数据报总数
    pub rx_datagrams: AtomicU64,
    /// 成功解码并交给 handler 的消息数
    pub rx_dispatched: AtomicU64,
    /// 结构校验失败而丢弃的数据报数
    pub rx_discarded: AtomicU64,
    /// 接收系统调用失败次数
    pub rx_transport_errors: AtomicU64,
    /// 接收操作投递（re-arm）次数
    pub rx_arms: AtomicU64,
}

impl ConnectorMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取，彼此之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tx_submitted: self.tx_submitted.load(Ordering::Relaxed),
            tx_completed: self.tx_completed.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
            tx_cancelled: self.tx_cancelled.load(Ordering::Relaxed),
            tx_would_block: self.tx_would_block.load(Ordering::Relaxed),
            rx_datagrams: self.rx_datagrams.load(Ordering::Relaxed),
            rx_dispatched: self.rx_dispatched.load(Ordering::Relaxed),
            rx_discarded: self.rx_discarded.load(Ordering::Relaxed),
            rx_transport_errors: self.rx_transport_errors.load(Ordering::Relaxed),
            rx_arms: self.rx_arms.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.tx_submitted.store(0, Ordering::Relaxed);
        self.tx_completed.store(0, Ordering::Relaxed);
        self.tx_failed.store(0, Ordering::Relaxed);
        self.tx_cancelled.store(0, Ordering::Relaxed);
        self.tx_would_block.store(0, Ordering::Relaxed);
        self.rx_datagrams.store(0, Ordering::Relaxed);
        self.rx_dispatched.store(0, Ordering::Relaxed);
        self.rx_discarded.store(0, Ordering::Relaxed);
        self.rx_transport_errors.store(0, Ordering::Relaxed);
        self.rx_arms.store(0, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 指标快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub tx_submitted: u64,
    pub tx_completed: u64,
    pub tx_failed: u64,
    pub tx_cancelled: u64,
    pub tx_would_block: u64,
    pub rx_datagrams: u64,
    pub rx_dispatched: u64,
    pub rx_discarded: u64,
    pub rx_transport_errors: u64,
    pub rx_arms: u64,
}

impl MetricsSnapshot {
    /// 仍在途（已提交但尚未完成）的发送数
    pub fn tx_in_flight(&self) -> u64 {
        self.tx_submitted
            .saturating_sub(self.tx_completed + self.tx_failed + self.tx_cancelled)
    }

    /// 丢弃率（百分比），`rx_datagrams` 为 0 时返回 0.0
    pub fn discard_rate(&self) -> f64 {
        if self.rx_datagrams == 0 {
            return 0.0;
        }
        (self.rx_discarded as f64 / self.rx_datagrams as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        let snapshot = ConnectorMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.discard_rate(), 0.0);
    }

    #[test]
    fn test_metrics_in_flight() {
        let metrics = ConnectorMetrics::new();
        metrics.tx_submitted.fetch_add(10, Ordering::Relaxed);
        metrics.tx_completed.fetch_add(6, Ordering::Relaxed);
        metrics.tx_failed.fetch_add(1, Ordering::Relaxed);
        metrics.tx_cancelled.fetch_add(2, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().tx_in_flight(), 1);
    }

    #[test]
    fn test_discard_rate() {
        let metrics = ConnectorMetrics::new();
        metrics.rx_datagrams.fetch_add(4, Ordering::Relaxed);
        metrics.rx_discarded.fetch_add(1, Ordering::Relaxed);
        assert!((metrics.snapshot().discard_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = ConnectorMetrics::new();
        metrics.rx_arms.fetch_add(3, Ordering::Relaxed);
        metrics.tx_submitted.fetch_add(3, Ordering::Relaxed);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_concurrent_increment() {
        let metrics = Arc::new(ConnectorMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ConnectorMetrics::incr(&metrics.rx_datagrams);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().rx_datagrams, 4000);
    }
}
