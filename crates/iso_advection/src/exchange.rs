// crates/iso_advection/src/exchange.rs

//! 分区间数据交换
//!
//! 分区（SPMD）之间唯一的协作点。输运引擎通过 [`ProcessorExchange`] 与
//! 相邻分区交换处理器补丁上的体积分数、点插值部分和以及面通量。
//!
//! - [`SerialExchange`]: 单分区运行，不发送任何消息
//! - [`LocalExchange`]: 同一进程内以线程模拟多个分区，邮箱按
//!   `(发送方, 接收方, 标签)` 排队，接收带超时

use glam::DVec3;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AdvectionError, AdvectionResult};

/// 消息标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeTag {
    /// 处理器补丁上的单元体积分数
    PatchAlpha,
    /// 点插值部分和
    PointSums,
    /// 面体积通量
    FaceFluxes,
    /// 有界性检查标记
    BoundingMarks,
    /// 全局归约
    Reduce,
}

/// 分区间消息
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeMessage {
    /// 补丁面（按补丁内顺序）相邻单元的值
    PatchAlpha {
        /// 每个补丁面一个值
        values: Vec<f64>,
    },
    /// 补丁点上的插值部分和
    PointSums {
        /// 点坐标
        points: Vec<DVec3>,
        /// 权重和
        weights: Vec<f64>,
        /// 加权值和，每点 `width` 个分量
        sums: Vec<f64>,
        /// 分量数
        width: usize,
    },
    /// 补丁面（补丁内序号）上的通量
    FaceFluxes {
        /// 补丁内面序号
        faces: Vec<usize>,
        /// 通量
        values: Vec<f64>,
    },
    /// 补丁面所属单元距最近表面单元的剩余层数（0、1、2）
    BoundingMarks {
        /// 每个补丁面一个值
        hops: Vec<u8>,
    },
    /// 标量
    Scalar(f64),
}

impl ExchangeMessage {
    fn kind(&self) -> &'static str {
        match self {
            Self::PatchAlpha { .. } => "PatchAlpha",
            Self::PointSums { .. } => "PointSums",
            Self::FaceFluxes { .. } => "FaceFluxes",
            Self::BoundingMarks { .. } => "BoundingMarks",
            Self::Scalar(_) => "Scalar",
        }
    }
}

/// 分区通信接口
pub trait ProcessorExchange: Send + Sync {
    /// 本分区号
    fn rank(&self) -> usize;

    /// 分区总数
    fn n_ranks(&self) -> usize;

    /// 是否多分区运行
    fn is_parallel(&self) -> bool {
        self.n_ranks() > 1
    }

    /// 发送消息（不阻塞）
    fn send(&self, to: usize, tag: ExchangeTag, message: ExchangeMessage) -> AdvectionResult<()>;

    /// 接收来自 `from` 的下一条消息，超时返回错误
    fn receive(&self, from: usize, tag: ExchangeTag) -> AdvectionResult<ExchangeMessage>;

    /// 全局求和，各分区按分区号顺序累加，结果逐位一致
    fn sum_reduce(&self, value: f64) -> AdvectionResult<f64> {
        if !self.is_parallel() {
            return Ok(value);
        }
        let me = self.rank();
        for r in (0..self.n_ranks()).filter(|&r| r != me) {
            self.send(r, ExchangeTag::Reduce, ExchangeMessage::Scalar(value))?;
        }
        let mut total = 0.0;
        for r in 0..self.n_ranks() {
            if r == me {
                total += value;
                continue;
            }
            match self.receive(r, ExchangeTag::Reduce)? {
                ExchangeMessage::Scalar(v) => total += v,
                other => {
                    return Err(AdvectionError::exchange(
                        me,
                        format!("归约期望 Scalar, 收到 {}", other.kind()),
                    ))
                }
            }
        }
        Ok(total)
    }
}

/// 按消息类型解包，类型不符时返回交换错误
pub(crate) fn unexpected(rank: usize, expected: &str, got: &ExchangeMessage) -> AdvectionError {
    AdvectionError::exchange(rank, format!("期望 {expected} 消息, 收到 {}", got.kind()))
}

// ============================================================================
// 单分区
// ============================================================================

/// 单分区运行
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExchange;

impl ProcessorExchange for SerialExchange {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _tag: ExchangeTag, _message: ExchangeMessage) -> AdvectionResult<()> {
        Err(AdvectionError::exchange(0, format!("单分区运行不能向分区 {to} 发送")))
    }

    fn receive(&self, from: usize, _tag: ExchangeTag) -> AdvectionResult<ExchangeMessage> {
        Err(AdvectionError::exchange(0, format!("单分区运行不能从分区 {from} 接收")))
    }
}

// ============================================================================
// 进程内多分区
// ============================================================================

type MailboxKey = (usize, usize, ExchangeTag);

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<MailboxKey, VecDeque<ExchangeMessage>>>,
    arrived: Condvar,
}

/// 进程内多分区交换（每个分区一个实例，共享邮箱）
#[derive(Clone)]
pub struct LocalExchange {
    rank: usize,
    n_ranks: usize,
    timeout: Duration,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for LocalExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExchange")
            .field("rank", &self.rank)
            .field("n_ranks", &self.n_ranks)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LocalExchange {
    /// 创建 `n_ranks` 个共享邮箱的分区端点
    pub fn group(n_ranks: usize, timeout: Duration) -> Vec<LocalExchange> {
        let mailbox = Arc::new(Mailbox::default());
        (0..n_ranks)
            .map(|rank| LocalExchange {
                rank,
                n_ranks,
                timeout,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// 接收超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 尚未被接收的消息数
    pub fn pending(&self) -> usize {
        self.mailbox.queues.lock().values().map(VecDeque::len).sum()
    }

    fn check_rank(&self, other: usize) -> AdvectionResult<()> {
        if other >= self.n_ranks || other == self.rank {
            return Err(AdvectionError::exchange(
                self.rank,
                format!("无效的对端分区 {other} (分区数 {})", self.n_ranks),
            ));
        }
        Ok(())
    }
}

impl ProcessorExchange for LocalExchange {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn send(&self, to: usize, tag: ExchangeTag, message: ExchangeMessage) -> AdvectionResult<()> {
        self.check_rank(to)?;
        let mut queues = self.mailbox.queues.lock();
        queues.entry((self.rank, to, tag)).or_default().push_back(message);
        drop(queues);
        self.mailbox.arrived.notify_all();
        Ok(())
    }

    fn receive(&self, from: usize, tag: ExchangeTag) -> AdvectionResult<ExchangeMessage> {
        self.check_rank(from)?;
        let key = (from, self.rank, tag);
        let deadline = Instant::now() + self.timeout;
        let mut queues = self.mailbox.queues.lock();
        loop {
            if let Some(message) = queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AdvectionError::exchange(
                    self.rank,
                    format!("等待分区 {from} 的 {tag:?} 消息超时 ({:?})", self.timeout),
                ));
            }
            self.mailbox.arrived.wait_for(&mut queues, deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_exchange() {
        let ex = SerialExchange;
        assert!(!ex.is_parallel());
        assert_eq!(ex.sum_reduce(2.5).unwrap(), 2.5);
        assert!(ex.send(1, ExchangeTag::FaceFluxes, ExchangeMessage::Scalar(0.0)).is_err());
    }

    #[test]
    fn test_local_exchange_fifo() {
        let group = LocalExchange::group(2, Duration::from_secs(5));
        group[0]
            .send(1, ExchangeTag::FaceFluxes, ExchangeMessage::Scalar(1.0))
            .unwrap();
        group[0]
            .send(1, ExchangeTag::FaceFluxes, ExchangeMessage::Scalar(2.0))
            .unwrap();
        assert_eq!(group[0].pending(), 2);
        assert_eq!(
            group[1].receive(0, ExchangeTag::FaceFluxes).unwrap(),
            ExchangeMessage::Scalar(1.0)
        );
        assert_eq!(
            group[1].receive(0, ExchangeTag::FaceFluxes).unwrap(),
            ExchangeMessage::Scalar(2.0)
        );
        assert_eq!(group[1].pending(), 0);
    }

    #[test]
    fn test_receive_times_out() {
        let group = LocalExchange::group(2, Duration::from_millis(20));
        assert!(matches!(
            group[1].receive(0, ExchangeTag::PatchAlpha),
            Err(AdvectionError::Exchange { rank: 1, .. })
        ));
        assert!(group[0].send(0, ExchangeTag::PatchAlpha, ExchangeMessage::Scalar(0.0)).is_err());
    }

    #[test]
    fn test_sum_reduce_across_threads() {
        let group = LocalExchange::group(3, Duration::from_secs(5));
        let results: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = group
                .iter()
                .map(|ex| s.spawn(move || ex.sum_reduce(ex.rank() as f64 + 0.5).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in results {
            assert_eq!(r, 4.5);
        }
    }
}
