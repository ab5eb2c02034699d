//! 金丝雀图样协议（仅 `diagnostics` 构建参与编译）。
//!
//! 空闲块的整段范围必须保持为固定图样：归还时重新打戳，
//! 下次租借时校验。校验失败说明有人在块无主期间写入了
//! 其范围，即“归还后使用”型内存腐坏，属于不可继续的致命错误。

use core::panic::Location;
use core::{ptr, slice};

/// 打戳与校验共用的图样字节。
pub(crate) const CANARY: u8 = 0xA5;

/// 将 `[base, base + len)` 整段覆写为金丝雀图样。
///
/// # Safety
/// `base` 必须指向仍然存活的 slab 范围，且 `len` 不越过块边界；
/// 调用时块必须没有任何外部持有者（计数为 0 或首次租借尚未交付）。
pub(crate) unsafe fn stamp(base: *mut u8, len: usize) {
    unsafe { ptr::write_bytes(base, CANARY, len) };
}

/// 校验 `[base, base + len)` 仍完整保持图样，发现偏差立即 panic。
///
/// # Safety
/// 与 [`stamp`] 相同：范围必须存活且当前无外部持有者。
pub(crate) unsafe fn verify(
    base: *const u8,
    len: usize,
    offset: usize,
    last_site: Option<&'static Location<'static>>,
) {
    let bytes = unsafe { slice::from_raw_parts(base, len) };
    if let Some(position) = bytes.iter().position(|&byte| byte != CANARY) {
        let found = bytes[position];
        match last_site {
            Some(site) => panic!(
                "偏移 {offset} 处的块在空闲期间被写入：位置 {position} 期望 {CANARY:#04x} 实际 {found:#04x}（最近租借于 {site}）"
            ),
            None => panic!(
                "偏移 {offset} 处的块在空闲期间被写入：位置 {position} 期望 {CANARY:#04x} 实际 {found:#04x}"
            ),
        }
    }
}
