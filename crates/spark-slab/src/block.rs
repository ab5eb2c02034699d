//! 可出租块：引用计数、三种字节视图与作用域守卫。
//!
//! # 模块定位（Why）
//! - 块是池的出租单元：`(offset, len)` 在构造时固定，终生绑定同一 slab，
//!   同一 slab 内的在租块范围互不重叠。
//! - 引用计数以 CAS 重试循环维护而非互斥锁，保证热路径上的
//!   `retain`/`release` 永不阻塞调用线程。
//!
//! # 设计概要（How）
//! - [`BlockState`] 为内部共享状态：计数、停用标志、回到池的弱引用；
//! - [`BlockLease`] 是公开的作用域守卫，恰好持有一个计数单位，
//!   析构路径无条件释放，使“忘记归还”在结构上不可能发生；
//! - 三种视图等价地暴露同一段字节：`span`（切片）、`segment`
//!   （数组段式视图）、`pin`（裸地址，见 [`crate::pin`]）。
//!
//! # 并发契约（What）
//! - 跨线程共享块的唯一正当方式是 `retain`（或 `pin`）；
//!   未各自持有引用的两个使用者并发访问同一块属于未定义行为。

use alloc::sync::{Arc, Weak};
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

#[cfg(feature = "diagnostics")]
use core::panic::Location;

#[cfg(feature = "diagnostics")]
use crate::canary;
use crate::error::PoolError;
use crate::pin::PinnedBlock;
use crate::pool::PoolShared;
use crate::slab::Slab;

/// `release` 的结果：本次是否放下了最后一个引用。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReleaseOutcome {
    /// 本次释放是最后一个引用，块已回到池中。
    Final,
    /// 仍有其它持有者，块保持在租状态。
    Shared,
}

/// 块的内部共享状态。
///
/// # 教案式说明
/// - **意图 (Why)**：将计数、停用标志与回收路由集中在一个 `Arc` 载体上，
///   守卫、钉住与池内空闲链表共享同一份记账。
/// - **契约 (What)**：
///   - 计数语义：`0` 已归还、`1` 独占在租、`>1` 共享；
///   - `pooled` 标志块当前是否躺在空闲链表中，用于检测二次归还；
///   - `pool` 为弱引用：块不延长池的生命周期，池先亡时零引用块
///     随 slab 一起被动回收。
/// - **设计权衡 (Trade-offs)**：块持有 `Arc<Slab>` 仅作为地址稳定性凭据，
///   slab 的首要所有者是池的 slab 列表，循环引用由 `Weak` 切断。
pub(crate) struct BlockState {
    slab: Arc<Slab>,
    offset: usize,
    len: usize,
    refs: AtomicIsize,
    disposed: AtomicBool,
    pooled: AtomicBool,
    pool: Weak<PoolShared>,
    #[cfg(feature = "diagnostics")]
    canary_armed: AtomicBool,
    #[cfg(feature = "diagnostics")]
    lease_site: spin::Mutex<Option<&'static Location<'static>>>,
}

impl BlockState {
    /// 由池的切片逻辑构造；新块以“已在空闲链表”状态诞生。
    pub(crate) fn new(
        slab: Arc<Slab>,
        offset: usize,
        len: usize,
        pool: Weak<PoolShared>,
    ) -> Arc<Self> {
        debug_assert!(
            offset.checked_add(len).is_some_and(|end| end <= slab.len()),
            "块范围不得越过 slab 边界"
        );
        Arc::new(Self {
            slab,
            offset,
            len,
            refs: AtomicIsize::new(0),
            disposed: AtomicBool::new(false),
            pooled: AtomicBool::new(true),
            pool,
            #[cfg(feature = "diagnostics")]
            canary_armed: AtomicBool::new(false),
            #[cfg(feature = "diagnostics")]
            lease_site: spin::Mutex::new(None),
        })
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn current_refs(&self) -> isize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn slab_active(&self) -> bool {
        self.slab.is_active()
    }

    /// 块范围的起始地址。范围合法性由构造时的边界断言保证。
    fn base_ptr(&self) -> *mut u8 {
        // 安全性：`offset + len <= slab.len()` 在构造时成立且不再变化。
        unsafe { self.slab.base().add(self.offset) }
    }

    /// 由池在交付前调用：计数从 0 复位为 1，并执行金丝雀协议。
    ///
    /// 空闲链表只容纳计数为 0 的块，复位失败意味着池的记账被破坏。
    #[cfg_attr(feature = "diagnostics", track_caller)]
    pub(crate) fn lease(&self) {
        #[cfg(feature = "diagnostics")]
        let site = Location::caller();
        if self
            .refs
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            unreachable!("空闲链表弹出的块引用计数必为 0");
        }
        self.pooled.store(false, Ordering::Release);
        #[cfg(feature = "diagnostics")]
        self.run_canary_protocol(site);
    }

    /// 首次租借打戳；后续租借校验归还时留下的图样。
    #[cfg(feature = "diagnostics")]
    fn run_canary_protocol(&self, site: &'static Location<'static>) {
        if !self.canary_armed.swap(true, Ordering::AcqRel) {
            // 安全性：计数刚从 0 复位为 1，尚未交付，无其它访问者。
            unsafe { canary::stamp(self.base_ptr(), self.len) };
        } else if self.slab.is_active() {
            let last = *self.lease_site.lock();
            // 安全性：同上；校验只读。
            unsafe { canary::verify(self.base_ptr(), self.len, self.offset, last) };
        }
        *self.lease_site.lock() = Some(site);
    }

    /// 归还时由池重新打戳，使下次租借的校验语义成立。
    #[cfg(feature = "diagnostics")]
    pub(crate) fn restamp(&self) {
        // 安全性：归还路径上计数已为 0，无外部持有者。
        unsafe { canary::stamp(self.base_ptr(), self.len) };
    }

    /// CAS 重试循环递增计数；对停用或无租约的块拒绝共享。
    pub(crate) fn retain_ref(&self) -> Result<(), PoolError> {
        loop {
            let current = self.refs.load(Ordering::Acquire);
            if current <= 0 || self.disposed.load(Ordering::Acquire) {
                return Err(PoolError::Disposed { offset: self.offset });
            }
            if self
                .refs
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// CAS 重试循环递减计数；计数恰好归零时把块交还给池。
    ///
    /// 计数已非正时返回重复释放错误，且绝不把计数驱动为负。
    pub(crate) fn release_ref(this: &Arc<Self>) -> Result<ReleaseOutcome, PoolError> {
        loop {
            let current = this.refs.load(Ordering::Acquire);
            if current <= 0 {
                return Err(PoolError::DoubleRelease { offset: this.offset });
            }
            if this
                .refs
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                if current == 1 {
                    Self::hand_back(this);
                    return Ok(ReleaseOutcome::Final);
                }
                return Ok(ReleaseOutcome::Shared);
            }
        }
    }

    /// 独占停用：仅在调用方是唯一持有者（计数恰为 1）时成立。
    ///
    /// 成功后块被标记为终态并交还池侧记账；池不会再将其入队。
    pub(crate) fn dispose_exclusive(this: &Arc<Self>) -> Result<(), PoolError> {
        match this
            .refs
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                this.disposed.store(true, Ordering::Release);
                Self::hand_back(this);
                Ok(())
            }
            Err(observed) => Err(PoolError::DisposeShared {
                references: observed,
            }),
        }
    }

    /// 池退役时对空闲块打终态标记；不经过归还路径。
    pub(crate) fn dispose_idle(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// 标记块已回到空闲链表；返回先前的标记以供二次归还检测。
    pub(crate) fn mark_pooled(&self) -> bool {
        self.pooled.swap(true, Ordering::AcqRel)
    }

    /// 零引用钩子：路由回池；池先亡时块随 slab 被动回收。
    fn hand_back(this: &Arc<Self>) {
        match this.pool.upgrade() {
            Some(pool) => pool.restock(this),
            None => {
                tracing::trace!(offset = this.offset, "池已销毁，零引用块随 slab 一同回收");
            }
        }
    }

    fn ensure_usable(&self) -> Result<(), PoolError> {
        if self.is_disposed() {
            return Err(PoolError::Disposed {
                offset: self.offset,
            });
        }
        Ok(())
    }

    /// 只读切片视图；合法性依赖调用方持有有效引用。
    fn as_slice(&self) -> Result<&[u8], PoolError> {
        self.ensure_usable()?;
        // 安全性：范围在构造时经过边界断言；持有引用期间 slab 不会退役。
        Ok(unsafe { slice::from_raw_parts(self.base_ptr(), self.len) })
    }
}

/// 块租约：恰好持有一个引用计数单位的作用域守卫。
///
/// # 教案式说明
/// - **意图 (Why)**：把“最后一个持有者负责归还”的约定落实为析构路径，
///   调用端既不能忘记归还，也不能重复归还——两类泄漏都在结构上被消除。
/// - **契约 (What)**：
///   - [`retain`](Self::retain) 产生新的守卫并使计数加一；
///   - [`release`](Self::release) 显式消费守卫并报告是否为最终引用；
///   - 析构与显式释放等价，二者只会发生其一；
///   - 视图与钉住操作在块停用后一律失败。
/// - **设计权衡 (Trade-offs)**：[`span_mut`](Self::span_mut) 依赖 `&mut self`
///   的独占借用约束本守卫，但无法约束其它 retain 出的守卫；
///   跨持有者的并发写入协调由调用方负责，这与裸指针视图的契约一致。
pub struct BlockLease {
    block: Arc<BlockState>,
    defused: bool,
}

impl BlockLease {
    pub(crate) fn new(block: Arc<BlockState>) -> Self {
        Self {
            block,
            defused: false,
        }
    }

    /// 块的字节长度。
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// 块是否为零长度（常规配置下恒为 `false`）。
    pub fn is_empty(&self) -> bool {
        self.block.len() == 0
    }

    /// 块在所属 slab 内的起始偏移。
    pub fn offset(&self) -> usize {
        self.block.offset()
    }

    /// 只读字节视图，覆盖恰好 `[offset, offset + len)`。
    pub fn span(&self) -> Result<&[u8], PoolError> {
        self.block.as_slice()
    }

    /// 可写字节视图。
    ///
    /// 独占借用只约束本守卫；若同一块还存在其它 retain 出的守卫，
    /// 并发写入的协调由调用方负责。
    pub fn span_mut(&mut self) -> Result<&mut [u8], PoolError> {
        self.block.ensure_usable()?;
        // 安全性：范围构造时经过边界断言，租约存续期间 slab 保持存活。
        Ok(unsafe { slice::from_raw_parts_mut(self.block.base_ptr(), self.block.len()) })
    }

    /// 数组段式视图：携带 `(offset, len)` 元数据与有界拷贝操作。
    pub fn segment(&self) -> Result<BlockSegment<'_>, PoolError> {
        self.block.ensure_usable()?;
        Ok(BlockSegment {
            base: self.block.base_ptr(),
            offset: self.block.offset(),
            len: self.block.len(),
            _lease: PhantomData,
        })
    }

    /// 钉住块并取得 `slab 基址 + 块偏移 + byte_offset` 处的裸地址。
    ///
    /// 钉住本身额外持有一个引用，保证地址外流期间块不会回池、
    /// slab 不会退役；合法偏移为 `0..=len`。
    pub fn pin(&self, byte_offset: usize) -> Result<PinnedBlock, PoolError> {
        if byte_offset > self.block.len() {
            return Err(PoolError::OutOfRange {
                requested: byte_offset,
                len: self.block.len(),
            });
        }
        self.block.ensure_usable()?;
        self.block.retain_ref()?;
        // 安全性：`byte_offset <= len` 且块范围不越过 slab 边界，
        // 结果指针最多指向同一分配的尾后一字节位置；基址非空。
        let addr =
            unsafe { NonNull::new_unchecked(self.block.base_ptr().add(byte_offset)) };
        Ok(PinnedBlock::new(Arc::clone(&self.block), addr))
    }

    /// 共享块：计数加一并返回新的守卫。
    pub fn retain(&self) -> BlockLease {
        match self.block.retain_ref() {
            Ok(()) => BlockLease::new(Arc::clone(&self.block)),
            Err(_) => unreachable!("守卫存续期间引用计数必然 ≥ 1"),
        }
    }

    /// 显式释放并报告是否放下了最后一个引用。
    ///
    /// 与直接析构等价；显式形式便于调用端对 `Final` 分支做决策。
    pub fn release(mut self) -> ReleaseOutcome {
        self.defused = true;
        match BlockState::release_ref(&self.block) {
            Ok(outcome) => outcome,
            Err(_) => unreachable!("守卫存续期间引用计数必然 ≥ 1"),
        }
    }

    /// 以唯一持有者身份显式停用块。
    ///
    /// 仅当本守卫是最后一个引用（计数恰为 1、无未解钉住）时成功；
    /// 停用后块永久退出流通，其范围保留至 slab 退役。失败时返回
    /// [`PoolError::DisposeShared`]，且本守卫照常作为普通释放处理。
    pub fn dispose(mut self) -> Result<(), PoolError> {
        let result = BlockState::dispose_exclusive(&self.block);
        if result.is_ok() {
            self.defused = true;
        }
        result
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        if let Err(error) = BlockState::release_ref(&self.block) {
            tracing::error!(code = error.code(), "租约析构路径释放失败");
        }
    }
}

impl core::fmt::Debug for BlockLease {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockLease")
            .field("offset", &self.block.offset())
            .field("len", &self.block.len())
            .field("refs", &self.block.current_refs())
            .finish()
    }
}

/// 数组段式视图：同一段字节的 `(offset, len)` 表示。
///
/// 生命周期绑定在产生它的租约借用上，不额外持有引用；
/// 所有拷贝操作都带边界检查。
pub struct BlockSegment<'lease> {
    base: *mut u8,
    offset: usize,
    len: usize,
    _lease: PhantomData<&'lease BlockLease>,
}

impl core::fmt::Debug for BlockSegment<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockSegment")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl BlockSegment<'_> {
    /// 段在所属 slab 内的起始偏移。
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 段的字节长度。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 段是否为零长度。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 只读切片视图。
    pub fn as_slice(&self) -> &[u8] {
        // 安全性：视图存续期间租约借用保持有效，范围构造时已校验。
        unsafe { slice::from_raw_parts(self.base, self.len) }
    }

    /// 将段的前 `dst.len()` 字节拷贝到目标切片。
    pub fn copy_to_slice(&self, dst: &mut [u8]) -> Result<(), PoolError> {
        if dst.len() > self.len {
            return Err(PoolError::OutOfRange {
                requested: dst.len(),
                len: self.len,
            });
        }
        // 安全性：长度已校验；目标切片与 slab 范围不可能重叠。
        unsafe { core::ptr::copy_nonoverlapping(self.base, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// 将 `src` 整体写入段的起始位置。
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<(), PoolError> {
        if src.len() > self.len {
            return Err(PoolError::OutOfRange {
                requested: src.len(),
                len: self.len,
            });
        }
        // 安全性：长度已校验；来源切片与 slab 范围不可能重叠。
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), self.base, src.len()) };
        Ok(())
    }

    /// 以 `value` 填充整段。
    pub fn fill(&mut self, value: u8) {
        // 安全性：范围构造时已校验。
        unsafe { core::ptr::write_bytes(self.base, value, self.len) };
    }
}
