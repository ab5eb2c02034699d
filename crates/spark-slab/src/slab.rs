//! 一次性分配的连续后备内存（Arena）。
//!
//! # 模块定位（Why）
//! - 池中所有块都切片自同一批 slab；slab 在整个服役期内地址稳定，
//!   因此块可以放心向外暴露裸指针。
//! - `active` 标志区分两种回收场景：slab 仍在服役时块被异常回收
//!   属于记账错误，slab 整体退役后则是良性的。
//!
//! # 设计概要（How）
//! - 后备存储是 `Box<[UnsafeCell<u8>]>`：装箱后的切片不会再搬移，
//!   `UnsafeCell` 允许多个互不重叠的租借块经由共享引用并发写入各自范围。
//! - slab 自身不做任何切片记账；偏移与长度由块持有，二者的配对
//!   不变量（互不重叠、不越界）由池的切片逻辑保证。

use alloc::{boxed::Box, vec::Vec};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// 单个 slab：零初始化的连续字节区加一个服役标志。
pub(crate) struct Slab {
    bytes: Box<[UnsafeCell<u8>]>,
    active: AtomicBool,
}

// 安全性：slab 的字节只会经由池发出的块访问，块之间的 `(offset, len)`
// 范围互不重叠，单块内的并发写入由调用方的 retain 契约约束。
// `active` 为原子标志，其余字段在构造后不再变化。
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// 一次性保留 `len` 字节并置 `active = true`。
    ///
    /// 分配失败（内存耗尽）由全局分配器按其策略处理，仅影响本次调用。
    pub(crate) fn allocate(len: usize) -> Self {
        let mut cells = Vec::with_capacity(len);
        cells.resize_with(len, || UnsafeCell::new(0));
        Self {
            bytes: cells.into_boxed_slice(),
            active: AtomicBool::new(true),
        }
    }

    /// 后备区总字节数。
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// 返回稳定的基地址，供块计算各自范围的起点。
    ///
    /// `UnsafeCell` 与其内部值布局一致，因此指针转换合法；
    /// 解引用的合法范围由持有 `(offset, len)` 的块负责约束。
    pub(crate) fn base(&self) -> *mut u8 {
        self.bytes.as_ptr() as *mut u8
    }

    /// slab 是否仍在服役。
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 标记退役；返回是否由本次调用完成了首次退役。
    pub(crate) fn retire(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_zeroes_and_activates() {
        let slab = Slab::allocate(32);
        assert_eq!(slab.len(), 32);
        assert!(slab.is_active());
        let bytes = unsafe { core::slice::from_raw_parts(slab.base(), slab.len()) };
        assert!(bytes.iter().all(|&b| b == 0), "新 slab 必须零初始化");
    }

    #[test]
    fn retire_reports_first_transition_only() {
        let slab = Slab::allocate(8);
        assert!(slab.retire(), "首次退役应报告状态翻转");
        assert!(!slab.is_active());
        assert!(!slab.retire(), "重复退役不应再次报告翻转");
    }
}
