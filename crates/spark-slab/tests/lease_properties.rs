//! `lease_properties` 性质测试：以随机化输入固化计数与视图不变量。
//!
//! # 测试目标（Why）
//! - 枚举式用例难以覆盖 retain/release 的全部组合，
//!   以 proptest 在随机份数与随机负载下验证“恰好一次最终释放”；
//! - 钉住偏移的闭区间判定与视图往返一致性同样适合性质化表达。

use proptest::prelude::*;
use spark_slab::{PoolConfig, ReleaseOutcome, SlabPool};

proptest! {
    /// 任意份数的共享引用，释放完毕后恰好一次 Final、恰好一次归还。
    #[test]
    fn any_share_count_yields_single_final(extra in 0usize..48) {
        let pool = SlabPool::new(PoolConfig::new(128, 2)).expect("配置合法");
        let root = pool.lease().expect("租借失败");
        let guards: Vec<_> = (0..extra).map(|_| root.retain()).collect();

        let mut finals = 0;
        for guard in guards {
            if guard.release() == ReleaseOutcome::Final {
                finals += 1;
            }
        }
        if root.release() == ReleaseOutcome::Final {
            finals += 1;
        }
        prop_assert_eq!(finals, 1);
        prop_assert_eq!(pool.stats().total_returns, 1);
        prop_assert_eq!(pool.stats().active_leases, 0);
    }

    /// 钉住偏移在 `0..=len` 内必须成功，超出则必须越界失败。
    #[test]
    fn pin_offset_classification(offset in 0usize..512) {
        let pool = SlabPool::new(PoolConfig::new(256, 1)).expect("配置合法");
        let lease = pool.lease().expect("租借失败");
        let result = lease.pin(offset);
        if offset <= 256 {
            prop_assert!(result.is_ok(), "闭区间内的偏移不应被拒绝");
        } else {
            prop_assert!(result.is_err(), "越界偏移必须失败");
        }
    }

    /// 经 `span_mut` 写入的任意负载，必须能从 `segment` 原样读回。
    #[test]
    fn span_writes_round_trip_through_segment(payload in proptest::collection::vec(any::<u8>(), 0..=64)) {
        let pool = SlabPool::new(PoolConfig::new(64, 1)).expect("配置合法");
        let mut lease = pool.lease().expect("租借失败");
        lease.span_mut().expect("可写视图失败")[..payload.len()].copy_from_slice(&payload);

        let segment = lease.segment().expect("数组段视图失败");
        prop_assert_eq!(&segment.as_slice()[..payload.len()], &payload[..]);

        let mut readback = vec![0u8; payload.len()];
        segment.copy_to_slice(&mut readback).expect("段读取失败");
        prop_assert_eq!(&readback[..], &payload[..]);
    }
}
