//! 钉住守卫：裸地址外流期间额外持有一个引用。

use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::block::BlockState;

/// 钉住的块地址。
///
/// # 教案式说明
/// - **意图 (Why)**：与本地代码或系统调用互操作时需要稳定的裸地址；
///   钉住在取得地址的同时把引用计数加一，保证地址外流期间块不会
///   回到空闲链表、slab 不会退役。
/// - **契约 (What)**：
///   - [`as_ptr`](Self::as_ptr) 返回 `slab 基址 + 块偏移 + 钉住偏移`；
///   - 析构（或显式 [`unpin`](Self::unpin)）执行配对的 `release`；
///   - 经由该地址读写的边界与并发正确性由调用方的 unsafe 代码负责。
/// - **设计权衡 (Trade-offs)**：守卫实现 `Send`，允许把地址连同其
///   生命周期凭据一起交给别的线程；指针本身的使用始终是 unsafe 契约。
pub struct PinnedBlock {
    block: Arc<BlockState>,
    addr: NonNull<u8>,
}

// 安全性：`BlockState` 自身 `Send + Sync`；`addr` 只是进入其范围的
// 地址快照，所有解引用都发生在调用方的 unsafe 块中。
unsafe impl Send for PinnedBlock {}
unsafe impl Sync for PinnedBlock {}

impl PinnedBlock {
    pub(crate) fn new(block: Arc<BlockState>, addr: NonNull<u8>) -> Self {
        Self { block, addr }
    }

    /// 钉住位置的非空地址。
    pub fn addr(&self) -> NonNull<u8> {
        self.addr
    }

    /// 钉住位置的裸指针形式。
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// 显式解除钉住；与析构等价的语义糖。
    pub fn unpin(self) {}
}

impl core::fmt::Debug for PinnedBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PinnedBlock")
            .field("addr", &self.addr)
            .finish()
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        if let Err(error) = BlockState::release_ref(&self.block) {
            tracing::error!(code = error.code(), "解除钉住时释放引用失败");
        }
    }
}
