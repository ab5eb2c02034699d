//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义缓冲池对外暴露的错误语义，区分“调用方编程错误”
//!   （重复释放、越界钉住）与“对象已终结”（块停用、池退役）两类场景；
//! - 每个变体都绑定稳定错误码，便于日志与告警系统做机读归类。
//!
//! ## 设计要求（What）
//! - 启用 `std` 特性时派生 `thiserror::Error` 以兼容 `std::error::Error`；
//!   `no_std` 构建下提供等价的手写 `Display`；
//! - 所有变体满足 `Send + Sync + 'static`，可安全跨线程传播；
//! - 错误一律同步返回给直接调用方，不在内部重试：它们标记的是
//!   编程错误而非瞬态故障。

use alloc::string::String;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use thiserror::Error;

/// 缓冲池核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合租借、共享、视图访问与池生命周期各路径的失败形态，
///   细粒度枚举帮助调用方精确区分“停止使用该块”与“修复调用逻辑”两种处置。
/// - **契约 (What)**：
///   - 除金丝雀腐坏（诊断构建下直接 panic）之外，所有失败都以本类型同步返回；
///   - [`code`](Self::code) 提供 `<域>.<语义>` 约定的稳定错误码；
///   - 变体携带的数值字段仅用于排障展示，不参与语义判定。
/// - **设计权衡 (Trade-offs)**：`InvalidConfig` 使用 `String` 保存上下文，
///   牺牲一次堆分配换取可读性；其余变体均为零分配。
#[cfg_attr(feature = "std", derive(Error))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PoolError {
    /// 对已停用（或当前不在租期内）的块执行视图、钉住或共享操作。
    ///
    /// - **意图 (Why)**：停用是终态，任何后续访问都说明调用方持有过期句柄。
    /// - **契约 (What)**：`offset` 为块在 slab 内的起始偏移；调用方应停止使用该块。
    #[cfg_attr(
        feature = "std",
        error("block at offset {offset} is disposed or holds no active lease")
    )]
    Disposed { offset: usize },

    /// 引用计数已为 0 时再次释放。
    ///
    /// - **意图 (Why)**：重复释放意味着所有权记账被破坏，必须暴露而非吞掉。
    /// - **契约 (What)**：计数不会被驱动为负值；错误返回后块状态保持不变。
    #[cfg_attr(
        feature = "std",
        error("double release detected for block at offset {offset}")
    )]
    DoubleRelease { offset: usize },

    /// 视图或钉住请求超出块的字节范围。
    ///
    /// - **契约 (What)**：合法钉住偏移为 `0..=len`（含末端一字节后位置）；
    ///   `requested` 为调用方传入的偏移或拷贝长度。
    #[cfg_attr(
        feature = "std",
        error("offset {requested} is out of range for a block of {len} bytes")
    )]
    OutOfRange { requested: usize, len: usize },

    /// 在仍有其它共享引用时尝试显式停用块。
    ///
    /// - **意图 (Why)**：策略上禁止在计数大于 1 时停用，避免悬挂视图与未解的钉住。
    /// - **契约 (What)**：`references` 为拒绝时观察到的引用计数。
    #[cfg_attr(
        feature = "std",
        error("cannot dispose block while {references} references are outstanding")
    )]
    DisposeShared { references: isize },

    /// 仍有未归还租约时尝试退役整个池。
    ///
    /// - **契约 (What)**：退役失败不改变任何状态；`active` 为当前在租块数。
    #[cfg_attr(
        feature = "std",
        error("pool retirement refused: {active} leases are still outstanding")
    )]
    LeasesOutstanding { active: usize },

    /// 向已退役的池请求租借。
    #[cfg_attr(feature = "std", error("pool is retired and no longer leases blocks"))]
    PoolRetired,

    /// 池配置非法（尺寸为零或相乘溢出）。
    #[cfg_attr(feature = "std", error("invalid pool configuration: {detail}"))]
    InvalidConfig { detail: String },
}

impl PoolError {
    /// 返回 `<域>.<语义>` 约定的稳定错误码，供日志与指标归类。
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Disposed { .. } => "slab.block.disposed",
            PoolError::DoubleRelease { .. } => "slab.block.double_release",
            PoolError::OutOfRange { .. } => "slab.block.out_of_range",
            PoolError::DisposeShared { .. } => "slab.block.dispose_shared",
            PoolError::LeasesOutstanding { .. } => "slab.pool.leases_outstanding",
            PoolError::PoolRetired => "slab.pool.retired",
            PoolError::InvalidConfig { .. } => "slab.config.invalid",
        }
    }
}

#[cfg(not(feature = "std"))]
impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Disposed { offset } => {
                write!(f, "block at offset {offset} is disposed or holds no active lease")
            }
            PoolError::DoubleRelease { offset } => {
                write!(f, "double release detected for block at offset {offset}")
            }
            PoolError::OutOfRange { requested, len } => {
                write!(f, "offset {requested} is out of range for a block of {len} bytes")
            }
            PoolError::DisposeShared { references } => {
                write!(f, "cannot dispose block while {references} references are outstanding")
            }
            PoolError::LeasesOutstanding { active } => {
                write!(f, "pool retirement refused: {active} leases are still outstanding")
            }
            PoolError::PoolRetired => write!(f, "pool is retired and no longer leases blocks"),
            PoolError::InvalidConfig { detail } => {
                write!(f, "invalid pool configuration: {detail}")
            }
        }
    }
}
