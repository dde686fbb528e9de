//! SDIO 设备访问
//!
//! - F1：字节寄存器（CMD52）与经背板窗口的 32 位访问、RAM 批量读写
//! - F2：帧数据 FIFO，单缓冲或散列链
//! - 设备状态机 `Down → Data → NoMedium`（终态）；主机返回介质消失时自动进入 NoMedium
//!
//! 背板地址 = 窗口（32K 对齐，写入 SBADDRLOW/MID/HIGH）+ 15 位窗内偏移；窗口只在变化时重写。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use bus::{BusState, BusStateObserver, Delay, Error, Poll, Result};
use chip::regs::{cc, chip_id, core_id, SI_ENUM_BASE_DEFAULT};
use chip::{BuscoreOps, ChipInfo, Core};
use mmc::{sdio_abort, F0Access, SdioFunc};
use skb::SkBuff;

use crate::regs::{self, f1};

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DevState {
    Down = 0,
    Data = 1,
    /// 介质消失，终态
    NoMedium = 2,
}

impl DevState {
    fn from_raw(v: u8) -> Self {
        match v {
            1 => Self::Data,
            2 => Self::NoMedium,
            _ => Self::Down,
        }
    }
}

const WINDOW_INVALID: u32 = u32::MAX;
/// F2 FIFO 经 chipcommon 窗口访问
const F2_FIFO_BASE: u32 = SI_ENUM_BASE_DEFAULT;
/// F1 SDIO 设备 id：4335/4339 共用，rev>=2 按 4339 处理
const SDIO_DEVICE_4335_4339: u16 = 0x4335;
const SDIO_DEVICE_4339: u16 = 0x4339;
/// ALP 可用等待
const ALP_WAIT_STEP_US: u32 = 10;

pub struct SdioDev<F> {
    func1: F,
    func2: F,
    sbwad: AtomicU32,
    /// SDIO 设备核基址，attach 时记录
    sdio_core: AtomicU32,
    state: AtomicU8,
    observer: Box<dyn BusStateObserver>,
    delay: Box<dyn Delay + Send + Sync>,
}

impl<F: SdioFunc> SdioDev<F> {
    pub fn new(
        func1: F,
        func2: F,
        delay: Box<dyn Delay + Send + Sync>,
        observer: Box<dyn BusStateObserver>,
    ) -> Self {
        Self {
            func1,
            func2,
            sbwad: AtomicU32::new(WINDOW_INVALID),
            sdio_core: AtomicU32::new(0),
            state: AtomicU8::new(DevState::Down as u8),
            observer,
            delay,
        }
    }

    pub fn func1(&self) -> &F {
        &self.func1
    }

    pub fn func2(&self) -> &F {
        &self.func2
    }

    pub fn delay(&self) -> &dyn Delay {
        &*self.delay
    }

    pub fn state(&self) -> DevState {
        DevState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// 状态迁移；进出 Data 时通知观察者。NoMedium 之后不再迁移
    pub fn change_state(&self, new: DevState) {
        let old = self.state();
        if old == new || old == DevState::NoMedium {
            return;
        }
        self.state.store(new as u8, Ordering::Release);
        if new == DevState::NoMedium {
            log::error!(target: "brcmfmac::sdio", "device state {:?} -> {:?}", old, new);
        } else {
            log::info!(target: "brcmfmac::sdio", "device state {:?} -> {:?}", old, new);
        }
        if old == DevState::Data {
            self.observer.bus_state_changed(BusState::Down);
        } else if new == DevState::Data {
            self.observer.bus_state_changed(BusState::Up);
        }
    }

    /// 主机错误码转换；介质消失时迁移到终态
    fn host_err(&self, code: i32) -> Error {
        let err = Error::from(code);
        if err == Error::NoMedium {
            self.change_state(DevState::NoMedium);
        }
        err
    }

    fn alive(&self) -> Result<()> {
        if self.state() == DevState::NoMedium {
            return Err(Error::NoMedium);
        }
        Ok(())
    }

    /// F1 字节寄存器读
    pub fn readb(&self, addr: u32) -> Result<u8> {
        self.alive()?;
        self.func1.readb(addr).map_err(|e| self.host_err(e))
    }

    pub fn writeb(&self, addr: u32, val: u8) -> Result<()> {
        self.alive()?;
        self.func1.writeb(addr, val).map_err(|e| self.host_err(e))
    }

    pub fn f0_readb(&self, reg: u8) -> Result<u8> {
        self.alive()?;
        self.func1.read_f0(reg).map_err(|e| self.host_err(e))
    }

    pub fn f0_writeb(&self, reg: u8, val: u8) -> Result<()> {
        self.alive()?;
        self.func1.write_f0(reg, val).map_err(|e| self.host_err(e))
    }

    /// 切换背板窗口；成功后才更新缓存
    fn set_backplane_window(&self, addr: u32) -> Result<()> {
        let bar0 = addr & regs::SBWINDOW_MASK;
        if self.sbwad.load(Ordering::Acquire) == bar0 {
            return Ok(());
        }
        let v = bar0 >> 8;
        for (i, reg) in [f1::SBADDRLOW, f1::SBADDRMID, f1::SBADDRHIGH].into_iter().enumerate() {
            if let Err(e) = self.writeb(reg, (v >> (8 * i)) as u8) {
                self.sbwad.store(WINDOW_INVALID, Ordering::Release);
                return Err(e);
            }
        }
        self.sbwad.store(bar0, Ordering::Release);
        Ok(())
    }

    /// 背板 32 位读
    pub fn readl(&self, addr: u32) -> Result<u32> {
        self.alive()?;
        self.set_backplane_window(addr)?;
        let off = (addr & regs::SB_OFT_ADDR_MASK) | regs::SB_ACCESS_2_4B_FLAG;
        self.func1.readl(off).map_err(|e| self.host_err(e))
    }

    /// 背板 32 位写
    pub fn writel(&self, addr: u32, val: u32) -> Result<()> {
        self.alive()?;
        self.set_backplane_window(addr)?;
        let off = (addr & regs::SB_OFT_ADDR_MASK) | regs::SB_ACCESS_2_4B_FLAG;
        self.func1.writel(off, val).map_err(|e| self.host_err(e))
    }

    fn sdio_core_base(&self) -> Result<u32> {
        match self.sdio_core.load(Ordering::Acquire) {
            0 => Err(Error::IoNotPresent),
            base => Ok(base),
        }
    }

    /// SDIO 设备核寄存器读
    pub fn core_readl(&self, reg: u32) -> Result<u32> {
        self.readl(self.sdio_core_base()? + reg)
    }

    pub fn core_writel(&self, reg: u32, val: u32) -> Result<()> {
        self.writel(self.sdio_core_base()? + reg, val)
    }

    /// 按窗口边界分块访问设备 RAM；结束后窗口回到 chipcommon
    fn ramrw(
        &self,
        addr: u32,
        len: usize,
        mut xfer: impl FnMut(&F, u32, core::ops::Range<usize>) -> core::result::Result<(), i32>,
    ) -> Result<()> {
        self.alive()?;
        let mut addr = addr;
        let mut done = 0;
        let mut result = Ok(());
        while done < len {
            let sdaddr = addr & regs::SB_OFT_ADDR_MASK;
            let n = ((regs::SB_OFT_ADDR_LIMIT - sdaddr) as usize).min(len - done);
            if let Err(e) = self.set_backplane_window(addr) {
                result = Err(e);
                break;
            }
            if let Err(code) = xfer(&self.func1, sdaddr | regs::SB_ACCESS_2_4B_FLAG, done..done + n) {
                log::error!(target: "brcmfmac::sdio", "membytes transfer failed at {:#x}", addr);
                result = Err(self.host_err(code));
                break;
            }
            done += n;
            addr += n as u32;
        }
        if self.state() != DevState::NoMedium {
            self.set_backplane_window(SI_ENUM_BASE_DEFAULT)?;
        }
        result
    }

    /// 读设备 RAM
    pub fn ram_read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        self.ramrw(addr, len, |f, a, r| f.read_incr(a, &mut buf[r]))
    }

    /// 写设备 RAM
    pub fn ram_write(&self, addr: u32, data: &[u8]) -> Result<()> {
        self.ramrw(addr, data.len(), |f, a, r| f.write_incr(a, &data[r]))
    }

    fn f2_addr(&self) -> Result<u32> {
        self.set_backplane_window(F2_FIFO_BASE)?;
        Ok((F2_FIFO_BASE & regs::SB_OFT_ADDR_MASK) | regs::SB_ACCESS_2_4B_FLAG)
    }

    /// F2 单缓冲读
    pub fn recv_buf(&self, buf: &mut [u8]) -> Result<()> {
        self.alive()?;
        let addr = self.f2_addr()?;
        self.func2.read_fifo(addr, buf).map_err(|e| self.host_err(e))
    }

    /// F2 单缓冲写
    pub fn send_buf(&self, buf: &[u8]) -> Result<()> {
        self.alive()?;
        let addr = self.f2_addr()?;
        self.func2.write_fifo(addr, buf).map_err(|e| self.host_err(e))
    }

    /// 一次读满整条链：主机支持足够段数时散列读，否则读入临时缓冲后逐个拷贝
    pub fn recv_chain(&self, chain: &mut [SkBuff]) -> Result<()> {
        self.alive()?;
        let addr = self.f2_addr()?;
        if let [only] = chain {
            return self
                .func2
                .read_fifo(addr, only.data_mut())
                .map_err(|e| self.host_err(e));
        }
        if self.func2.max_segs() >= chain.len() {
            let mut segs: Vec<&mut [u8]> = chain.iter_mut().map(|s| s.data_mut()).collect();
            return self
                .func2
                .read_sg(addr, true, &mut segs)
                .map_err(|e| self.host_err(e));
        }
        let total: usize = chain.iter().map(SkBuff::len).sum();
        let mut glom = vec![0u8; total];
        self.func2
            .read_fifo(addr, &mut glom)
            .map_err(|e| self.host_err(e))?;
        let mut rest = &glom[..];
        for skb in chain.iter_mut() {
            let (head, tail) = rest.split_at(skb.len());
            skb.data_mut().copy_from_slice(head);
            rest = tail;
        }
        Ok(())
    }

    /// 一次写出整条链
    pub fn send_chain(&self, chain: &[SkBuff]) -> Result<()> {
        self.alive()?;
        let addr = self.f2_addr()?;
        if let [only] = chain {
            return self
                .func2
                .write_fifo(addr, only.data())
                .map_err(|e| self.host_err(e));
        }
        if self.func2.max_segs() >= chain.len() {
            let segs: Vec<&[u8]> = chain.iter().map(SkBuff::data).collect();
            return self
                .func2
                .write_sg(addr, true, &segs)
                .map_err(|e| self.host_err(e));
        }
        let mut glom = Vec::with_capacity(chain.iter().map(SkBuff::len).sum());
        for skb in chain {
            glom.extend_from_slice(skb.data());
        }
        self.func2
            .write_fifo(addr, &glom)
            .map_err(|e| self.host_err(e))
    }

    /// 中止 F2 上进行中的传输
    pub fn abort_f2(&self) -> Result<()> {
        sdio_abort(&F0Access(&self.func1), self.func2.num()).map_err(|e| self.host_err(e))
    }

    pub fn enable_f2(&self) -> Result<()> {
        self.func2.enable_func().map_err(|e| self.host_err(e))
    }

    pub fn disable_f2(&self) -> Result<()> {
        self.func2.disable_func().map_err(|e| self.host_err(e))
    }

    /// 逐字节比对 RAM 内容
    pub fn verify_ram(&self, addr: u32, expect: &[u8]) -> Result<bool> {
        let mut readback = vec![0u8; expect.len()];
        self.ram_read(addr, &mut readback)?;
        match readback.iter().zip(expect).position(|(a, b)| a != b) {
            Some(pos) => {
                log::error!(
                    target: "brcmfmac::sdio",
                    "downloaded image mismatch at {:#x}",
                    addr + pos as u32
                );
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

impl<F: SdioFunc> BuscoreOps for SdioDev<F> {
    fn read32(&self, addr: u32) -> Result<u32> {
        let mut val = self.readl(addr)?;
        let dev = self.func1.device();
        if (dev == SDIO_DEVICE_4335_4339 || dev == SDIO_DEVICE_4339)
            && addr == SI_ENUM_BASE_DEFAULT + cc::CHIPID
        {
            let rev = (val & cc::CID_REV_MASK) >> cc::CID_REV_SHIFT;
            if rev >= 2 {
                val = (val & !cc::CID_ID_MASK) | chip_id::BCM4339;
            }
        }
        Ok(val)
    }

    fn write32(&self, addr: u32, val: u32) -> Result<()> {
        self.writel(addr, val)
    }

    /// 请求 ALP 时钟并关闭上拉
    fn prepare(&self) -> Result<()> {
        let clkset = regs::FORCE_HW_CLKREQ_OFF | regs::ALP_AVAIL_REQ;
        self.writeb(f1::CHIPCLKCSR, clkset)?;
        let clkval = self.readb(f1::CHIPCLKCSR)?;
        if clkval & !regs::AVBITS != clkset {
            log::error!(
                target: "brcmfmac::sdio",
                "ChipClkCSR access: wrote {:#04x} read {:#04x}",
                clkset, clkval
            );
            return Err(Error::NotReady);
        }
        bus::retry_with_interval(
            self.delay(),
            regs::PMU_MAX_TRANSITION_DLY / ALP_WAIT_STEP_US,
            ALP_WAIT_STEP_US,
            "ALP clock",
            |_| {
                Ok(if regs::alp_avail(self.readb(f1::CHIPCLKCSR)?) {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                })
            },
        )?;
        self.writeb(f1::CHIPCLKCSR, regs::FORCE_HW_CLKREQ_OFF | regs::FORCE_ALP)?;
        self.delay.delay_us(65);
        self.writeb(f1::SDIOPULLUP, 0)
    }

    fn setup(&self, _info: &ChipInfo, cores: &[Core]) -> Result<()> {
        let core = cores
            .iter()
            .find(|c| c.id == core_id::SDIO_DEV)
            .ok_or(Error::IoNotPresent)?;
        self.sdio_core.store(core.base, Ordering::Release);
        log::debug!(target: "brcmfmac::sdio", "sdio core rev {} @ {:#x}", core.rev, core.base);
        Ok(())
    }

    /// 清中断状态；CR4/CA7 把复位向量写到地址 0
    fn activate(&self, _info: &ChipInfo, rstvec: u32) -> Result<()> {
        self.core_writel(regs::core::INTSTATUS, 0xFFFF_FFFF)?;
        if rstvec != 0 {
            self.ram_write(0, &rstvec.to_le_bytes())?;
        }
        Ok(())
    }

    fn udelay(&self, us: u32) {
        self.delay.delay_us(us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChip;

    #[test]
    fn window_rewritten_only_on_change() {
        let mock = MockChip::new();
        let dev = mock.device();
        dev.readl(0x1800_0000).unwrap();
        let after_first = mock.sim().sbaddrlow_writes;
        dev.readl(0x1800_0004).unwrap();
        assert_eq!(mock.sim().sbaddrlow_writes, after_first);
        dev.readl(0x1800_3000).unwrap();
        assert_eq!(mock.sim().sbaddrlow_writes, after_first);
        dev.readl(0x1801_8000).unwrap();
        assert_eq!(mock.sim().sbaddrlow_writes, after_first + 1);
    }

    #[test]
    fn ram_write_crosses_window_boundary() {
        let mock = MockChip::new();
        let dev = mock.device();
        let data: Vec<u8> = (0..64u8).collect();
        dev.ram_write(0x7FE0, &data).unwrap();
        assert_eq!(&mock.sim().ram[0x7FE0..0x8020], &data[..]);
        let mut back = vec![0u8; 64];
        dev.ram_read(0x7FE0, &mut back).unwrap();
        assert_eq!(back, data);
        assert!(dev.verify_ram(0x7FE0, &data).unwrap());
    }

    #[test]
    fn medium_loss_is_terminal() {
        let mock = MockChip::new();
        let dev = mock.device();
        dev.change_state(DevState::Data);
        mock.sim_mut().fail_all = Some(-123);
        assert_eq!(dev.readb(f1::CHIPCLKCSR), Err(Error::NoMedium));
        assert_eq!(dev.state(), DevState::NoMedium);
        mock.sim_mut().fail_all = None;
        assert_eq!(dev.readl(0x1800_0000), Err(Error::NoMedium));
        dev.change_state(DevState::Data);
        assert_eq!(dev.state(), DevState::NoMedium);
        assert_eq!(mock.observed(), [BusState::Up, BusState::Down]);
    }
}
