#![cfg_attr(not(feature = "std"), no_std)]

//! `spark-slab` 提供面向高吞吐 I/O 路径的固定分块 slab 缓冲池。
//!
//! # 模块定位（Why）
//! - 网络服务在每次读写时临时分配字节缓冲会带来显著的堆压力，
//!   本 crate 通过一次性分配大块 slab、按固定尺寸切片出租，
//!   使缓冲获取退化为一次空闲链表弹出。
//! - 块以原子引用计数共享，最后一个持有者释放时自动回到池中，
//!   调用端无需关心归还时机，也不可能忘记归还。
//!
//! # 设计概要（How）
//! - `slab` 模块承载一次性分配的连续后备内存（Arena），
//!   地址在整个生命周期内稳定，供裸指针互操作使用；
//! - `block` 模块实现可出租单元：CAS 重试循环维护引用计数，
//!   并以 `span` / `segment` / `pin` 三种等价视图暴露同一段字节；
//! - `pool` 模块是编排者：空闲链表耗尽时增长新 slab，
//!   零引用块经回收钩子重新入队；
//! - `diagnostics` Feature 编译期启用金丝雀图样校验与租借点跟踪，
//!   用于在调试构建中捕获“归还后写入”类内存腐坏。
//!
//! # 命名约定（Consistency）
//! - 沿用池化领域的通用术语：`lease`（租借）、`retain`/`release`
//!   （共享与释放）、`pin`（钉住并取得裸地址）、`retire`（退役）。
//!   避免引入额外前缀，保证调用端体验一致。

extern crate alloc;

mod block;
#[cfg(feature = "diagnostics")]
mod canary;
mod error;
mod pin;
mod pool;
mod slab;

pub use block::{BlockLease, BlockSegment, ReleaseOutcome};
pub use error::PoolError;
pub use pin::PinnedBlock;
pub use pool::{PoolConfig, PoolStats, SlabPool};
