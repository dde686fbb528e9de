//! 设备共享区、控制台与死机诊断
//!
//! 固件启动后把共享结构的地址写在 RAM 末 4 字节（SR 芯片再往前让出 SR 区）。
//! 在固件写入之前，这里是 NVRAM 长度令牌，它恰好满足“高 16 位为低 16 位取反”，据此判为无效。

use alloc::string::String;
use alloc::vec;

use bus::{log_console_line, Error, Result};
use mmc::{with_host_claimed, SdioFunc};

use crate::bus::{SdioBus, SdioInner};
use crate::sdpcm::get_le32;

pub const SHARED_VERSION_MASK: u32 = 0x00FF;
pub const SHARED_VERSION: u32 = 3;
pub const SHARED_ASSERT_BUILT: u32 = 0x0100;
pub const SHARED_ASSERT: u32 = 0x0200;
pub const SHARED_TRAP: u32 = 0x0400;

const SHARED_LEN: usize = 32;
/// rte_console 内 log 结构的偏移
const CONSOLE_LOG_OFFSET: u32 = 8;
const CONSOLE_BUFSIZE_MAX: u32 = 0x10000;
const ASSERT_STR_MAX: usize = 80;
const TRAP_LEN: usize = 80;

/// 共享结构（全部小端 u32）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SharedInfo {
    pub flags: u32,
    pub trap_addr: u32,
    pub assert_exp_addr: u32,
    pub assert_file_addr: u32,
    pub assert_line: u32,
    pub console_addr: u32,
    pub msgtrace_addr: u32,
    pub fwid: u32,
}

impl SharedInfo {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < SHARED_LEN {
            return Err(Error::BadFrame);
        }
        let sh = Self {
            flags: get_le32(raw, 0),
            trap_addr: get_le32(raw, 4),
            assert_exp_addr: get_le32(raw, 8),
            assert_file_addr: get_le32(raw, 12),
            assert_line: get_le32(raw, 16),
            console_addr: get_le32(raw, 20),
            msgtrace_addr: get_le32(raw, 24),
            fwid: get_le32(raw, 28),
        };
        if sh.version() > SHARED_VERSION {
            log::error!(
                target: "brcmfmac::sdio",
                "shared version unsupported: host {} dongle {}",
                SHARED_VERSION,
                sh.version()
            );
            return Err(Error::BadFrame);
        }
        Ok(sh)
    }

    pub fn version(&self) -> u32 {
        self.flags & SHARED_VERSION_MASK
    }
}

/// 0 或“高半字为低半字取反”的值不是共享结构地址
#[inline]
pub fn valid_shared_addr(addr: u32) -> bool {
    addr != 0 && ((!addr >> 16) & 0xFFFF) != (addr & 0xFFFF)
}

/// ARM 异常现场
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrapRecord {
    pub ty: u32,
    pub epc: u32,
    pub cpsr: u32,
    pub spsr: u32,
    /// r0..r15（r13 sp、r14 lr、r15 pc）
    pub r: [u32; 16],
}

impl TrapRecord {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < TRAP_LEN {
            return None;
        }
        let mut r = [0u32; 16];
        for (i, v) in r.iter_mut().enumerate() {
            *v = get_le32(raw, 16 + i * 4);
        }
        Some(Self {
            ty: get_le32(raw, 0),
            epc: get_le32(raw, 4),
            cpsr: get_le32(raw, 8),
            spsr: get_le32(raw, 12),
            r,
        })
    }

    fn log(&self) {
        let r = &self.r;
        log::error!(
            target: "brcmfmac::sdio",
            "dongle trap type {:#x} @ epc {:#010x}, cpsr {:#010x} spsr {:#010x} sp {:#010x} lr {:#010x} pc {:#010x}",
            self.ty, self.epc, self.cpsr, self.spsr, r[13], r[14], r[15]
        );
        log::error!(
            target: "brcmfmac::sdio",
            "r0 {:#010x} r1 {:#010x} r2 {:#010x} r3 {:#010x} r4 {:#010x} r5 {:#010x} r6 {:#010x} r7 {:#010x}",
            r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]
        );
    }
}

impl<F: SdioFunc> SdioBus<F> {
    /// 共享结构地址所在位置
    fn shared_ptr_addr(&self) -> u32 {
        let info = self.chip.info();
        let mut addr = info.rambase + info.ramsize - 4;
        if info.rambase == 0 && self.chip.sr_capable().unwrap_or(false) {
            addr -= info.srsize;
        }
        addr
    }

    /// 读取共享结构；调用方已占用 host 且时钟可用
    pub(crate) fn readshared(&self) -> Result<SharedInfo> {
        let dev = self.dev();
        let mut word = [0u8; 4];
        dev.ram_read(self.shared_ptr_addr(), &mut word)?;
        let addr = u32::from_le_bytes(word);
        if !valid_shared_addr(addr) {
            log::debug!(target: "brcmfmac::sdio", "shared address {:#010x} invalid", addr);
            return Err(Error::InvalidArgument);
        }
        let mut raw = [0u8; SHARED_LEN];
        dev.ram_read(addr, &mut raw)?;
        SharedInfo::parse(&raw)
    }

    fn read_fw_string(&self, addr: u32) -> String {
        if addr == 0 {
            return String::from("?");
        }
        let mut buf = [0u8; ASSERT_STR_MAX];
        if self.dev().ram_read(addr, &mut buf).is_err() {
            return String::from("?");
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    /// 检查固件是否断言或陷入异常；返回是否已死
    pub fn checkdied(&self) -> Result<bool> {
        with_host_claimed(self.dev().func1(), || self.checkdied_claimed())
    }

    pub(crate) fn checkdied_claimed(&self) -> Result<bool> {
        let sh = self.readshared()?;
        if sh.flags & SHARED_ASSERT_BUILT == 0 {
            log::debug!(target: "brcmfmac::sdio", "firmware built without assert support");
        }
        if sh.flags & (SHARED_ASSERT | SHARED_TRAP) == 0 {
            log::debug!(target: "brcmfmac::sdio", "no trap in firmware");
            return Ok(false);
        }
        if sh.flags & SHARED_ASSERT != 0 && sh.flags & SHARED_ASSERT_BUILT != 0 {
            let expr = self.read_fw_string(sh.assert_exp_addr);
            let file = self.read_fw_string(sh.assert_file_addr);
            log::error!(
                target: "brcmfmac::sdio",
                "dongle assert: expr \"{}\" file \"{}\" line {}",
                expr,
                file,
                sh.assert_line
            );
        }
        if sh.flags & SHARED_TRAP != 0 {
            let mut raw = [0u8; TRAP_LEN];
            self.dev().ram_read(sh.trap_addr, &mut raw)?;
            if let Some(tr) = TrapRecord::parse(&raw) {
                tr.log();
            }
        }
        Ok(true)
    }

    /// 把固件控制台的新行转到日志；返回输出行数
    pub(crate) fn readconsole(&self, inner: &mut SdioInner) -> Result<usize> {
        if inner.console_addr == 0 {
            return Ok(0);
        }
        let dev = self.dev();
        let mut hdr = [0u8; 12];
        dev.ram_read(inner.console_addr + CONSOLE_LOG_OFFSET, &mut hdr)?;
        let buf_addr = get_le32(&hdr, 0);
        let bufsize = get_le32(&hdr, 4);
        let idx = get_le32(&hdr, 8);
        if idx == inner.console.read_idx() {
            return Ok(0);
        }
        if bufsize == 0 || bufsize > CONSOLE_BUFSIZE_MAX {
            return Err(Error::BadFrame);
        }
        let mut ring = vec![0u8; bufsize as usize];
        dev.ram_read(buf_addr, &mut ring)?;
        inner
            .console
            .consume(idx, bufsize, |i| Ok(ring[i as usize]), log_console_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvram_token_is_not_an_address() {
        let words = 0x120u32;
        let token = (!words << 16) | (words & 0xFFFF);
        assert!(!valid_shared_addr(token));
        assert!(!valid_shared_addr(0));
        assert!(valid_shared_addr(0x0003_F000));
    }

    #[test]
    fn shared_version_bound() {
        let mut raw = [0u8; SHARED_LEN];
        raw[0] = 3;
        raw[20..24].copy_from_slice(&0x1234u32.to_le_bytes());
        let sh = SharedInfo::parse(&raw).unwrap();
        assert_eq!(sh.console_addr, 0x1234);
        raw[0] = 4;
        assert_eq!(SharedInfo::parse(&raw), Err(Error::BadFrame));
        assert_eq!(SharedInfo::parse(&raw[..16]), Err(Error::BadFrame));
    }

    #[test]
    fn trap_record_layout() {
        let mut raw = [0u8; TRAP_LEN];
        for (i, chunk) in raw.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&(i as u32).to_le_bytes());
        }
        let tr = TrapRecord::parse(&raw).unwrap();
        assert_eq!(tr.epc, 1);
        assert_eq!(tr.r[0], 4);
        assert_eq!(tr.r[15], 19);
        assert!(TrapRecord::parse(&raw[..40]).is_none());
    }
}
