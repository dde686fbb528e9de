//! 共享结构、ring info 与固件控制台
//!
//! 固件启动后把共享结构地址写到 RAM 末 4 字节。共享结构 flags 低 8 位为版本，
//! 另有位声明环下标放在主机 DMA 缓冲（2 或 4 字节宽）。

use bus::{log_console_line, ConsoleLines, Error, Result};

use crate::device::{PcieDev, PcieDevice};
use crate::regs::{self, console, ringinfo, shared, shared_flags};

#[inline]
pub(crate) fn get_le32(raw: &[u8], off: u32) -> u32 {
    let o = off as usize;
    u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]])
}

#[inline]
pub(crate) fn get_le16(raw: &[u8], off: u32) -> u16 {
    let o = off as usize;
    u16::from_le_bytes([raw[o], raw[o + 1]])
}

/// 共享结构中主机关心的字段
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PcieShared {
    /// 结构在设备 RAM 中的地址
    pub addr: u32,
    pub flags: u32,
    pub console_addr: u32,
    pub max_rxbufpost: u16,
    pub rx_dataoffset: u32,
    pub htod_mb_data_addr: u32,
    pub dtoh_mb_data_addr: u32,
    pub ring_info_addr: u32,
}

impl PcieShared {
    pub fn parse(addr: u32, raw: &[u8]) -> Result<Self> {
        if raw.len() < shared::LEN {
            return Err(Error::BadFrame);
        }
        let mut sh = Self {
            addr,
            flags: get_le32(raw, shared::FLAGS),
            console_addr: get_le32(raw, shared::CONSOLE_ADDR),
            max_rxbufpost: get_le16(raw, shared::MAX_RXBUFPOST),
            rx_dataoffset: get_le32(raw, shared::RX_DATAOFFSET),
            htod_mb_data_addr: get_le32(raw, shared::HTOD_MB_DATA_ADDR),
            dtoh_mb_data_addr: get_le32(raw, shared::DTOH_MB_DATA_ADDR),
            ring_info_addr: get_le32(raw, shared::RING_INFO_ADDR),
        };
        let version = sh.version();
        if !(regs::MIN_SHARED_VERSION..=regs::MAX_SHARED_VERSION).contains(&version) {
            log::error!(
                target: "brcmfmac::pcie",
                "unsupported shared version {} (supported {}..={})",
                version,
                regs::MIN_SHARED_VERSION,
                regs::MAX_SHARED_VERSION
            );
            return Err(Error::BadFrame);
        }
        if sh.max_rxbufpost == 0 {
            sh.max_rxbufpost = regs::DEF_MAX_RXBUFPOST;
        }
        Ok(sh)
    }

    pub fn read<D: PcieDevice>(dev: &PcieDev<D>, addr: u32) -> Result<Self> {
        let mut raw = [0u8; shared::LEN];
        dev.tcm_read(addr, &mut raw)?;
        let sh = Self::parse(addr, &raw)?;
        log::info!(
            target: "brcmfmac::pcie",
            "shared @ {:#x} version {} flags {:#x} dma index {}",
            addr,
            sh.version(),
            sh.flags,
            sh.dma_index_size()
        );
        Ok(sh)
    }

    pub fn version(&self) -> u32 {
        self.flags & shared_flags::VERSION_MASK
    }

    /// 固件声明的主机侧下标宽度；0 表示下标留在设备 RAM
    pub fn dma_index_size(&self) -> usize {
        if self.flags & shared_flags::DMA_INDEX == 0 {
            0
        } else if self.flags & shared_flags::DMA_2B_IDX != 0 {
            2
        } else {
            4
        }
    }

    /// 初始化完成后需经 H2D_MAILBOX_1 通知主机就绪
    pub fn hostready_db1(&self) -> bool {
        self.flags & shared_flags::HOSTRDY_DB1 != 0
    }
}

/// 环的布局信息
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingInfo {
    /// 设备侧环描述数组
    pub ringmem: u32,
    pub h2d_w_idx_ptr: u32,
    pub h2d_r_idx_ptr: u32,
    pub d2h_w_idx_ptr: u32,
    pub d2h_r_idx_ptr: u32,
    pub max_flowrings: u16,
    pub max_submissionrings: u16,
    pub max_completionrings: u16,
}

impl RingInfo {
    pub fn parse(raw: &[u8], version: u32) -> Result<Self> {
        if raw.len() < ringinfo::LEN {
            return Err(Error::BadFrame);
        }
        let raw_flowrings = get_le16(raw, ringinfo::MAX_FLOWRINGS);
        let (max_submissionrings, max_flowrings, max_completionrings) =
            if version >= regs::SHARED_VERSION_6 {
                (
                    get_le16(raw, ringinfo::MAX_SUBMISSIONRINGS),
                    raw_flowrings,
                    get_le16(raw, ringinfo::MAX_COMPLETIONRINGS),
                )
            } else {
                // 旧版本只给出提交环总数，其中含公共提交环
                let flow = raw_flowrings
                    .checked_sub(regs::H2D_COMMON_RINGS as u16)
                    .ok_or(Error::BadFrame)?;
                (raw_flowrings, flow, regs::D2H_COMMON_RINGS as u16)
            };
        if max_flowrings > regs::MAX_FLOWRINGS {
            log::error!(target: "brcmfmac::pcie", "invalid max_flowrings {}", max_flowrings);
            return Err(Error::BadFrame);
        }
        if (max_submissionrings as usize) < regs::H2D_COMMON_RINGS + max_flowrings as usize
            || (max_completionrings as usize) < regs::D2H_COMMON_RINGS
        {
            log::error!(
                target: "brcmfmac::pcie",
                "ring counts inconsistent: submission {} flow {} completion {}",
                max_submissionrings,
                max_flowrings,
                max_completionrings
            );
            return Err(Error::BadFrame);
        }
        Ok(Self {
            ringmem: get_le32(raw, ringinfo::RINGMEM),
            h2d_w_idx_ptr: get_le32(raw, ringinfo::H2D_W_IDX_PTR),
            h2d_r_idx_ptr: get_le32(raw, ringinfo::H2D_R_IDX_PTR),
            d2h_w_idx_ptr: get_le32(raw, ringinfo::D2H_W_IDX_PTR),
            d2h_r_idx_ptr: get_le32(raw, ringinfo::D2H_R_IDX_PTR),
            max_flowrings,
            max_submissionrings,
            max_completionrings,
        })
    }
}

/// 设备内存中的控制台环
#[derive(Debug, Default)]
pub struct PcieConsole {
    base_addr: u32,
    buf_addr: u32,
    bufsize: u32,
    lines: ConsoleLines,
}

impl PcieConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取控制台结构；地址为 0 时控制台不可用
    pub fn init<D: PcieDevice>(&mut self, dev: &PcieDev<D>, base_addr: u32) -> Result<()> {
        self.lines.reset();
        self.base_addr = base_addr;
        if base_addr == 0 {
            self.bufsize = 0;
            return Ok(());
        }
        self.buf_addr = dev.tcm_read32(base_addr + console::BUFADDR)?;
        self.bufsize = dev.tcm_read32(base_addr + console::BUFSIZE)?;
        log::debug!(
            target: "brcmfmac::pcie",
            "console buf {:#x} size {}",
            self.buf_addr,
            self.bufsize
        );
        Ok(())
    }

    /// 取走完整的行交给 `emit`，返回行数
    pub fn read<D: PcieDevice>(
        &mut self,
        dev: &PcieDev<D>,
        mut emit: impl FnMut(&str),
    ) -> Result<usize> {
        if self.base_addr == 0 || self.bufsize == 0 {
            return Ok(0);
        }
        let write_idx = dev.tcm_read32(self.base_addr + console::WRITEIDX)?;
        let buf_addr = self.buf_addr;
        self.lines.consume(
            write_idx,
            self.bufsize,
            |i| {
                let mut b = [0u8; 1];
                dev.tcm_read(buf_addr + i, &mut b)?;
                Ok(b[0])
            },
            &mut emit,
        )
    }

    /// 输出到固件日志
    pub fn drain<D: PcieDevice>(&mut self, dev: &PcieDev<D>) -> Result<usize> {
        self.read(dev, log_console_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_raw(flags: u32) -> [u8; shared::LEN] {
        let mut raw = [0u8; shared::LEN];
        raw[0..4].copy_from_slice(&flags.to_le_bytes());
        raw[40..44].copy_from_slice(&0x1000u32.to_le_bytes());
        raw[48..52].copy_from_slice(&0x2000u32.to_le_bytes());
        raw
    }

    #[test]
    fn shared_version_range() {
        assert_eq!(PcieShared::parse(0, &shared_raw(4)), Err(Error::BadFrame));
        assert_eq!(PcieShared::parse(0, &shared_raw(8)), Err(Error::BadFrame));
        let sh = PcieShared::parse(0x8000, &shared_raw(5)).unwrap();
        assert_eq!(sh.version(), 5);
        assert_eq!(sh.htod_mb_data_addr, 0x1000);
        assert_eq!(sh.ring_info_addr, 0x2000);
        assert_eq!(sh.max_rxbufpost, regs::DEF_MAX_RXBUFPOST);
    }

    #[test]
    fn dma_index_width() {
        let sh = |f| PcieShared::parse(0, &shared_raw(f)).unwrap();
        assert_eq!(sh(6).dma_index_size(), 0);
        assert_eq!(sh(6 | shared_flags::DMA_INDEX).dma_index_size(), 4);
        assert_eq!(
            sh(7 | shared_flags::DMA_INDEX | shared_flags::DMA_2B_IDX).dma_index_size(),
            2
        );
    }

    fn ringinfo_raw(flow: u16, sub: u16, cpl: u16) -> [u8; ringinfo::LEN] {
        let mut raw = [0u8; ringinfo::LEN];
        raw[52..54].copy_from_slice(&flow.to_le_bytes());
        raw[54..56].copy_from_slice(&sub.to_le_bytes());
        raw[56..58].copy_from_slice(&cpl.to_le_bytes());
        raw
    }

    #[test]
    fn ring_counts_by_version() {
        let v5 = RingInfo::parse(&ringinfo_raw(40, 0, 0), 5).unwrap();
        assert_eq!(
            (v5.max_submissionrings, v5.max_flowrings, v5.max_completionrings),
            (40, 38, 3)
        );
        let v6 = RingInfo::parse(&ringinfo_raw(16, 18, 3), 6).unwrap();
        assert_eq!(
            (v6.max_submissionrings, v6.max_flowrings, v6.max_completionrings),
            (18, 16, 3)
        );
        assert_eq!(RingInfo::parse(&ringinfo_raw(1, 0, 0), 5), Err(Error::BadFrame));
        assert_eq!(RingInfo::parse(&ringinfo_raw(600, 602, 3), 6), Err(Error::BadFrame));
    }
}
