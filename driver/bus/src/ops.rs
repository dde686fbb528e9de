//! 上层总线操作契约与总线状态通知
//!
//! 协议层 / MLME 通过 [`BusOps`] 使用 SDIO 或 PCIe 传输；传输层通过 [`BusStateObserver`] 与 [`RxHandler`] 回报状态与收包。

use skb::SkBuff;

use crate::error::Result;

/// 总线状态（对上层可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BusState {
    Down = 0,
    Up = 1,
}

/// 芯片 id 与修订号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChipId {
    pub chip: u32,
    pub chiprev: u32,
}

impl core::fmt::Display for ChipId {
    /// `BCM4339/2` 风格；0x4000..=0xA000 之间的 id 本身即为十六进制型号，其余按十进制
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.chip > 0xA000 || self.chip < 0x4000 {
            write!(f, "BCM{}/{}", self.chip, self.chiprev)
        } else {
            write!(f, "BCM{:x}/{}", self.chip, self.chiprev)
        }
    }
}

/// 总线状态观察者，进出 DATA 状态时调用
pub trait BusStateObserver: Send + Sync {
    fn bus_state_changed(&self, state: BusState);
}

/// 不关心状态变化时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BusStateObserver for NoopObserver {
    fn bus_state_changed(&self, _state: BusState) {}
}

/// 收包交付：按通道分为数据帧与固件事件
pub trait RxHandler: Send + Sync {
    /// 数据通道帧
    fn rx_data(&self, skb: SkBuff);
    /// 事件通道帧
    fn rx_event(&self, skb: SkBuff);
}

/// 丢弃所有收包
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardRx;

impl RxHandler for DiscardRx {
    fn rx_data(&self, _skb: SkBuff) {}
    fn rx_event(&self, _skb: SkBuff) {}
}

/// 上层总线操作
pub trait BusOps {
    /// 总线进入 DATA 状态
    fn init(&self) -> Result<()>;
    /// 停止总线并清空待发队列
    fn stop(&self);
    /// 发送数据包
    fn txdata(&self, skb: SkBuff) -> Result<()>;
    /// 发送控制消息，有界超时
    fn txctl(&self, msg: &[u8]) -> Result<()>;
    /// 接收控制消息，有界超时；返回写入 `buf` 的字节数
    fn rxctl(&self, buf: &mut [u8]) -> Result<usize>;
    /// 设备可用 RAM 大小
    fn get_ramsize(&self) -> u32;
    /// 读设备 RAM 用于诊断，返回读到的字节数
    fn get_memdump(&self, buf: &mut [u8]) -> Result<usize>;
    /// 芯片 id / 修订
    fn chip_id(&self) -> ChipId;
    /// 建议的固件与 NVRAM 基础名
    fn firmware_name(&self) -> Option<FirmwareNames>;
    /// 无线唤醒配置
    fn wowl_config(&self, enabled: bool);
}

/// 固件 / NVRAM 基础名（不含扩展名）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareNames {
    pub firmware: &'static str,
}

/// 固件名映射条目：芯片 id 与修订掩码（bit n 表示修订 n 适用）
#[derive(Debug, Clone, Copy)]
pub struct FirmwareMapping {
    pub chip: u32,
    pub revmask: u32,
    pub name: &'static str,
}

impl FirmwareMapping {
    pub const fn new(chip: u32, revmask: u32, name: &'static str) -> Self {
        Self { chip, revmask, name }
    }
}

/// 在常量表中查找芯片对应的固件名
pub fn firmware_lookup(table: &[FirmwareMapping], id: ChipId) -> Option<FirmwareNames> {
    let bit = 1u32.checked_shl(id.chiprev)?;
    let hit = table
        .iter()
        .find(|m| m.chip == id.chip && (m.revmask & bit) != 0);
    if hit.is_none() {
        log::error!(target: "brcmfmac::bus", "unknown chip {}", id);
    }
    hit.map(|m| FirmwareNames { firmware: m.name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    const TABLE: &[FirmwareMapping] = &[
        FirmwareMapping::new(0x4339, 0xFFFF_FFFF, "brcmfmac4339-sdio"),
        FirmwareMapping::new(0x4330, 0x0000_0010, "brcmfmac4330-sdio"),
    ];

    #[test]
    fn firmware_lookup_by_rev() {
        let id = ChipId { chip: 0x4330, chiprev: 4 };
        assert_eq!(firmware_lookup(TABLE, id).map(|n| n.firmware), Some("brcmfmac4330-sdio"));
        let id = ChipId { chip: 0x4330, chiprev: 3 };
        assert!(firmware_lookup(TABLE, id).is_none());
        let id = ChipId { chip: 0x4339, chiprev: 40 };
        assert!(firmware_lookup(TABLE, id).is_none());
    }

    #[test]
    fn chip_name_format() {
        assert_eq!(ChipId { chip: 0x4339, chiprev: 2 }.to_string(), "BCM4339/2");
        assert_eq!(ChipId { chip: 43430, chiprev: 1 }.to_string(), "BCM43430/1");
    }
}
