//! `pool_contract` 集成测试：验证 `SlabPool` 在真实调用路径下的契约执行情况。
//!
//! # 测试目标（Why）
//! - 保障租借、自动归还、slab 增长与退役等核心流程在 crate 公开 API 下正确协作；
//! - 通过外部 crate 视角（integration test）模拟用户调用，避免依赖内部实现细节；
//! - 及时捕获统计字段、空闲链表回收等回归，确保后续重构仍维持行为兼容。
//!
//! # 结构安排（How）
//! - `lease_hands_out_block_with_exact_range`：验证交付块的视图尺寸与统计基线；
//! - `exhausted_slab_grows_instead_of_overlapping`：覆盖“四块租满再租第五块”的增长场景；
//! - 其余测试覆盖退役前置条件、退役后的拒绝语义与默认配置路径。

use spark_slab::{PoolConfig, PoolError, ReleaseOutcome, SlabPool};

/// 验证租借交付的块视图恰好覆盖配置的块尺寸，且统计反映单块在租。
#[test]
fn lease_hands_out_block_with_exact_range() {
    let pool = SlabPool::new(PoolConfig::new(1024, 4)).expect("配置合法");
    let lease = pool.lease().expect("租借失败");
    let span = lease.span().expect("读取视图失败");
    assert_eq!(span.len(), 1024, "span 必须覆盖恰好一个块");
    assert_eq!(lease.len(), 1024);

    let stats = pool.stats();
    assert_eq!(stats.slab_count, 1, "首次租借应触发一次 slab 增长");
    assert_eq!(stats.allocated_bytes, 4096);
    assert_eq!(stats.active_leases, 1);
    assert_eq!(stats.free_blocks, 3);
    assert_eq!(stats.total_leases, 1);
}

/// 验证最后一个引用释放后块自动回到空闲链表并可被复用。
#[test]
fn final_release_returns_block_for_reuse() {
    let pool = SlabPool::new(PoolConfig::new(1024, 4)).expect("配置合法");
    let first_offset = {
        let lease = pool.lease().expect("首次租借失败");
        let offset = lease.offset();
        assert_eq!(lease.release(), ReleaseOutcome::Final);
        offset
    };

    let after_return = pool.stats();
    assert_eq!(after_return.active_leases, 0);
    assert_eq!(after_return.free_blocks, 4, "归还后空闲链表应恢复满员");
    assert_eq!(after_return.total_returns, 1);

    // 空闲链表后进先出，刚归还的块应最先被复用
    let reused = pool.lease().expect("复用租借失败");
    assert_eq!(reused.offset(), first_offset, "归还块应被优先复用");
    assert_eq!(pool.stats().slab_count, 1, "复用路径不应触发新的 slab 增长");
}

/// 增长场景：4096 字节 slab 切四个 1024 块，租满后第五次租借
/// 必须增长新 slab，而不是复用或重叠任何在租范围。
#[test]
fn exhausted_slab_grows_instead_of_overlapping() {
    let pool = SlabPool::new(PoolConfig::new(1024, 4)).expect("配置合法");
    let mut leases = Vec::new();
    for _ in 0..4 {
        leases.push(pool.lease().expect("租借失败"));
    }
    assert_eq!(pool.stats().slab_count, 1);
    assert_eq!(pool.stats().free_blocks, 0);

    leases.push(pool.lease().expect("第五次租借失败"));
    let stats = pool.stats();
    assert_eq!(stats.slab_count, 2, "空闲链表耗尽必须分配新 slab");
    assert_eq!(stats.active_leases, 5);

    // 五个在租块的地址区间必须两两不相交
    let mut starts: Vec<usize> = leases
        .iter()
        .map(|lease| {
            let pinned = lease.pin(0).expect("取基址失败");
            let addr = pinned.as_ptr() as usize;
            pinned.unpin();
            addr
        })
        .collect();
    starts.sort_unstable();
    for pair in starts.windows(2) {
        assert!(
            pair[0] + 1024 <= pair[1],
            "在租块范围出现重叠：{:#x} 与 {:#x}",
            pair[0],
            pair[1]
        );
    }
}

/// 退役的前置条件与幂等语义。
#[test]
fn retire_refuses_while_leases_outstanding() {
    let pool = SlabPool::new(PoolConfig::new(1024, 4)).expect("配置合法");
    let lease = pool.lease().expect("租借失败");
    assert_eq!(
        pool.retire(),
        Err(PoolError::LeasesOutstanding { active: 1 }),
        "带着未归还租约的退役必须被拒绝"
    );

    drop(lease);
    assert_eq!(pool.retire(), Ok(4096), "无在租块时退役应报告释放字节数");
    assert_eq!(pool.retire(), Ok(0), "重复退役应幂等");

    let stats = pool.stats();
    assert_eq!(stats.slab_count, 0);
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.free_blocks, 0);
}

/// 退役后的池拒绝新租借并累计失败计数。
#[test]
fn lease_after_retire_fails() {
    let pool = SlabPool::new(PoolConfig::new(256, 2)).expect("配置合法");
    pool.retire().expect("空池退役不应失败");
    assert_eq!(pool.lease().unwrap_err(), PoolError::PoolRetired);
    assert_eq!(pool.stats().failed_leases, 1);
}

/// 默认配置冒烟路径：克隆的池句柄共享同一份状态。
#[test]
fn default_pool_shares_state_across_clones() {
    let pool = SlabPool::default();
    let other = pool.clone();
    let lease = pool.lease().expect("租借失败");
    assert_eq!(lease.len(), 4096, "默认块尺寸为 4096 字节");
    assert_eq!(other.stats().active_leases, 1, "克隆句柄必须观察到同一份统计");
}
