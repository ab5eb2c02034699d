//! 池编排者：slab 增长策略与块回收。
//!
//! # 模块定位（Why）
//! - 池是所有 slab 与空闲块的终生所有者：租借请求优先复用空闲链表，
//!   耗尽时按配置一次性增长一个新 slab 并切片入队；
//! - 零引用块经 [`PoolShared::restock`] 回到链表，该路径同时承担
//!   归还侧不变量（计数为 0、不可二次入队）与诊断构建下的金丝雀重打戳。
//!
//! # 核心机制（How）
//! - 空闲链表与 slab 列表是池内仅有的共享可变结构，统一置于一把
//!   `spin::Mutex` 之下，使并发 `lease`/`restock` 线性化：
//!   不丢更新，也不可能把同一块交给两个调用方；
//! - 指标以宽松原子镜像维护，`stats` 快照无需长期持锁。

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::block::{BlockLease, BlockState};
use crate::error::PoolError;
use crate::slab::Slab;

/// 池的切片配置。
///
/// # 契约说明（What）
/// - `block_size`：每个块的字节数，必须大于 0；
/// - `slab_blocks`：每次增长时一个 slab 切出的块数，必须大于 0；
/// - 二者之积为单个 slab 的字节数，相乘溢出视为非法配置。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolConfig {
    pub block_size: usize,
    pub slab_blocks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            slab_blocks: 64,
        }
    }
}

impl PoolConfig {
    /// 以显式尺寸构造配置。
    pub fn new(block_size: usize, slab_blocks: usize) -> Self {
        Self {
            block_size,
            slab_blocks,
        }
    }

    /// 覆盖块尺寸。
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// 覆盖单个 slab 的块数。
    pub fn with_slab_blocks(mut self, slab_blocks: usize) -> Self {
        self.slab_blocks = slab_blocks;
        self
    }

    /// 校验配置并返回单个 slab 的字节数。
    fn validated_slab_bytes(&self) -> Result<usize, PoolError> {
        if self.block_size == 0 {
            return Err(PoolError::InvalidConfig {
                detail: String::from("block_size 不能为 0"),
            });
        }
        if self.slab_blocks == 0 {
            return Err(PoolError::InvalidConfig {
                detail: String::from("slab_blocks 不能为 0"),
            });
        }
        self.block_size
            .checked_mul(self.slab_blocks)
            .ok_or_else(|| PoolError::InvalidConfig {
                detail: format!(
                    "slab 字节数溢出：block_size = {}, slab_blocks = {}",
                    self.block_size, self.slab_blocks
                ),
            })
    }
}

/// 池统计快照，帮助调用方观测内存行为。
///
/// # 契约说明（What）
/// - 各字段为调用瞬间的一致快照：`slab_count`/`free_blocks` 在持锁下读取，
///   计数器来自宽松原子，不长期引用内部可变状态；
/// - `active_leases` 统计在租块数（按块计，不随 `retain` 变化）；
/// - `disposed_blocks` 统计被显式停用、永久退出流通的块数。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    pub slab_count: usize,
    pub allocated_bytes: usize,
    pub active_leases: usize,
    pub free_blocks: usize,
    pub total_leases: u64,
    pub total_returns: u64,
    pub disposed_blocks: u64,
    pub failed_leases: u64,
}

/// `SlabPool` 是固定分块 slab 缓冲池的公开入口。
///
/// # 教案式说明
/// - **意图 (Why)**：为高并发 I/O 路径提供常数时间的缓冲租借，
///   把堆分配频率压到“每个 slab 一次”，其余全部走空闲链表复用。
/// - **契约 (What)**：
///   - [`lease`](Self::lease) 交付计数恰为 1 的块守卫，绝不重叠在租范围；
///   - 最后一个引用释放后块自动回池，无需显式归还调用；
///   - [`retire`](Self::retire) 仅在无在租块时成功，之后拒绝新的租借。
/// - **设计权衡 (Trade-offs)**：选用自旋锁而非 `parking_lot`，
///   保证 `no_std` 环境同样可用；临界区仅做链表出入队，持锁极短。
#[derive(Clone)]
pub struct SlabPool {
    shared: Arc<PoolShared>,
}

impl core::fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlabPool")
            .field("block_size", &self.shared.block_size)
            .field("slab_blocks", &self.shared.slab_blocks)
            .field("slab_bytes", &self.shared.slab_bytes)
            .finish()
    }
}

impl Default for SlabPool {
    fn default() -> Self {
        match Self::new(PoolConfig::default()) {
            Ok(pool) => pool,
            Err(_) => unreachable!("默认配置必然通过校验"),
        }
    }
}

impl SlabPool {
    /// 以给定配置创建空池；首个 slab 延迟到第一次租借时分配。
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let slab_bytes = config.validated_slab_bytes()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                block_size: config.block_size,
                slab_blocks: config.slab_blocks,
                slab_bytes,
                core: Mutex::new(PoolCore {
                    free: Vec::new(),
                    slabs: Vec::new(),
                    retired: false,
                }),
                metrics: PoolMetrics::default(),
            }),
        })
    }

    /// 租借一个块，交付时引用计数恰为 1。
    ///
    /// 空闲链表为空时增长一个新 slab 并切片入队；诊断构建下
    /// 交付前执行金丝雀校验，并记录本次租借点。
    #[cfg_attr(feature = "diagnostics", track_caller)]
    pub fn lease(&self) -> Result<BlockLease, PoolError> {
        let block = {
            let mut core = self.shared.core.lock();
            if core.retired {
                self.shared.metrics.failed_leases.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::PoolRetired);
            }
            if core.free.is_empty() {
                PoolShared::grow(&self.shared, &mut core);
            }
            let block = match core.free.pop() {
                Some(block) => block,
                None => unreachable!("扩容后空闲链表不可能为空"),
            };
            self.shared.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.total_leases.fetch_add(1, Ordering::Relaxed);
            block
        };
        block.lease();
        Ok(BlockLease::new(block))
    }

    /// 返回当前统计快照。
    pub fn stats(&self) -> PoolStats {
        let (slab_count, free_blocks) = {
            let core = self.shared.core.lock();
            (core.slabs.len(), core.free.len())
        };
        let metrics = &self.shared.metrics;
        PoolStats {
            slab_count,
            free_blocks,
            allocated_bytes: metrics.allocated_bytes.load(Ordering::Relaxed),
            active_leases: metrics.active_leases.load(Ordering::Relaxed),
            total_leases: metrics.total_leases.load(Ordering::Relaxed),
            total_returns: metrics.total_returns.load(Ordering::Relaxed),
            disposed_blocks: metrics.disposed_blocks.load(Ordering::Relaxed),
            failed_leases: metrics.failed_leases.load(Ordering::Relaxed),
        }
    }

    /// 显式退役：停用全部空闲块、退役全部 slab，返回释放的字节数。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：无在租块；否则返回
    ///   [`PoolError::LeasesOutstanding`] 且不改变任何状态——
    ///   带着未归还租约做部分退役被策略性禁止；
    /// - **后置条件**：后续租借一律失败；重复退役幂等地返回 `Ok(0)`。
    pub fn retire(&self) -> Result<usize, PoolError> {
        let mut core = self.shared.core.lock();
        if core.retired {
            return Ok(0);
        }
        let active = self.shared.metrics.active_leases.load(Ordering::Acquire);
        if active > 0 {
            return Err(PoolError::LeasesOutstanding { active });
        }
        core.retired = true;
        let parked = core.free.len() as u64;
        for block in core.free.drain(..) {
            block.dispose_idle();
        }
        self.shared.metrics.disposed_blocks.fetch_add(parked, Ordering::Relaxed);
        let mut released = 0usize;
        for slab in core.slabs.drain(..) {
            slab.retire();
            released += slab.len();
        }
        saturating_sub(&self.shared.metrics.allocated_bytes, released);
        tracing::debug!(released_bytes = released, "缓冲池退役完成");
        Ok(released)
    }
}

/// 空闲链表与 slab 列表：池内仅有的共享可变结构，整体置于一把锁下。
struct PoolCore {
    free: Vec<Arc<BlockState>>,
    slabs: Vec<Arc<Slab>>,
    retired: bool,
}

pub(crate) struct PoolShared {
    block_size: usize,
    slab_blocks: usize,
    slab_bytes: usize,
    core: Mutex<PoolCore>,
    metrics: PoolMetrics,
}

impl PoolShared {
    /// 增长一个新 slab 并把全部切片压入空闲链表。
    ///
    /// 新切片之间以及与既有在租块之间绝不重叠：每个 slab 独占
    /// 自己的地址区间，slab 内按 `index * block_size` 顺序切分。
    fn grow(shared: &Arc<PoolShared>, core: &mut PoolCore) {
        let slab = Arc::new(Slab::allocate(shared.slab_bytes));
        for index in 0..shared.slab_blocks {
            core.free.push(BlockState::new(
                Arc::clone(&slab),
                index * shared.block_size,
                shared.block_size,
                Arc::downgrade(shared),
            ));
        }
        core.slabs.push(slab);
        shared
            .metrics
            .allocated_bytes
            .fetch_add(shared.slab_bytes, Ordering::Relaxed);
        tracing::debug!(
            slab_bytes = shared.slab_bytes,
            blocks = shared.slab_blocks,
            "空闲链表耗尽，分配新 slab"
        );
    }

    /// 归还路径：接收计数已归零的块。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：块的引用计数为 0（零引用钩子是唯一合法入口）；
    /// - 已停用的块在此被扣留，永不重新入队；
    /// - 同一块未经重新租借的二次归还是记账破坏，诊断构建下直接
    ///   panic，其余构建以调试断言暴露；
    /// - 诊断构建下入队前重新打戳金丝雀图样，支撑下次租借的校验。
    pub(crate) fn restock(&self, block: &Arc<BlockState>) {
        debug_assert_eq!(block.current_refs(), 0, "归还块的引用计数必须为 0");
        let mut core = self.core.lock();
        saturating_sub(&self.metrics.active_leases, 1);
        if block.is_disposed() {
            self.metrics.disposed_blocks.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(offset = block.offset(), "块已显式停用，其范围保留至 slab 退役");
            return;
        }
        if core.retired || !block.slab_active() {
            tracing::trace!(offset = block.offset(), "slab 已退役，归还块不再入队");
            return;
        }
        if block.mark_pooled() {
            #[cfg(feature = "diagnostics")]
            panic!(
                "偏移 {} 处的块在未重新租借的情况下被二次归还",
                block.offset()
            );
            #[cfg(not(feature = "diagnostics"))]
            {
                debug_assert!(false, "偏移 {} 处的块被二次归还", block.offset());
                return;
            }
        }
        #[cfg(feature = "diagnostics")]
        block.restamp();
        core.free.push(Arc::clone(block));
        self.metrics.total_returns.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    total_leases: AtomicU64,
    total_returns: AtomicU64,
    disposed_blocks: AtomicU64,
    failed_leases: AtomicU64,
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_block_size_is_rejected() {
        let error = SlabPool::new(PoolConfig::new(0, 4)).unwrap_err();
        assert_eq!(error.code(), "slab.config.invalid");
    }

    #[test]
    fn zero_slab_blocks_is_rejected() {
        let error = SlabPool::new(PoolConfig::new(1024, 0)).unwrap_err();
        assert_eq!(error.code(), "slab.config.invalid");
    }

    #[test]
    fn overflowing_slab_size_is_rejected() {
        let error = SlabPool::new(PoolConfig::new(usize::MAX, 2)).unwrap_err();
        assert!(matches!(error, PoolError::InvalidConfig { .. }));
    }

    #[test]
    fn builder_style_config_composes() {
        let config = PoolConfig::default()
            .with_block_size(1024)
            .with_slab_blocks(4);
        assert_eq!(config, PoolConfig::new(1024, 4));
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    #[test]
    #[should_panic(expected = "二次归还")]
    fn double_restock_fails_loudly() {
        let pool = SlabPool::new(PoolConfig::new(64, 1)).expect("配置合法");
        drop(pool.lease().expect("租借失败"));
        let block = {
            let core = pool.shared.core.lock();
            Arc::clone(core.free.last().expect("归还后链表应有块"))
        };
        pool.shared.restock(&block);
    }
}
