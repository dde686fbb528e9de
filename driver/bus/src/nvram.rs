//! NVRAM 镜像
//!
//! 两种传输都把 NVRAM 放在设备 RAM 末尾，最后一个字是长度令牌；固件据此找到 NVRAM 起点。

use alloc::vec::Vec;

/// 补齐到 4 字节后追加长度令牌（低半字为字数，高半字为其取反）
pub fn nvram_image(nvram: &[u8]) -> Vec<u8> {
    let padded = (nvram.len() + 3) & !3;
    let mut img = Vec::with_capacity(padded + 4);
    img.extend_from_slice(nvram);
    img.resize(padded, 0);
    let words = (padded / 4) as u32;
    let token = (!words << 16) | (words & 0xFFFF);
    img.extend_from_slice(&token.to_le_bytes());
    img
}
