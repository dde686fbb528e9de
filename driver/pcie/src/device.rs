//! PCIe 设备访问
//!
//! - 宿主接口 [`PcieDevice`]：配置空间、BAR0 寄存器、BAR2 TCM（设备 RAM）、DMA 一致性缓冲
//! - [`PcieDev`]：BAR0 窗口切换、TCM 读写、设备状态机，实现芯片层回调
//!
//! 背板地址 = 窗口（32K 对齐，写入配置空间 BAR0_WINDOW）+ 窗内偏移。窗口切换与随后的访问在同一把锁内完成，
//! 中断快速检查可与其它上下文并发。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use bus::{BusState, BusStateObserver, Delay, Error, Result};
use chip::regs::core_id;
use chip::{BuscoreOps, ChipInfo, Core};

use crate::regs::{self, cfg, pcie2};

/// DMA 一致性缓冲：主机侧按偏移读写，设备侧以 `dma_addr` 访问；drop 时释放
pub trait DmaBuffer: Send + Sync {
    fn dma_addr(&self) -> u64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, off: usize, buf: &mut [u8]);

    fn write(&self, off: usize, data: &[u8]);
}

/// PCIe 宿主接口，错误沿用 errno 风格 `i32`
pub trait PcieDevice: Send + Sync {
    type Dma: DmaBuffer;

    fn vendor(&self) -> u16;

    fn device(&self) -> u16;

    fn config_read32(&self, off: u32) -> core::result::Result<u32, i32>;

    fn config_write32(&self, off: u32, val: u32) -> core::result::Result<(), i32>;

    /// BAR0 寄存器读（窗内偏移）
    fn bar0_read32(&self, off: u32) -> core::result::Result<u32, i32>;

    fn bar0_write32(&self, off: u32, val: u32) -> core::result::Result<(), i32>;

    /// BAR2 TCM 读，偏移即设备 RAM 地址
    fn tcm_read(&self, off: u32, buf: &mut [u8]) -> core::result::Result<(), i32>;

    fn tcm_write(&self, off: u32, data: &[u8]) -> core::result::Result<(), i32>;

    /// 分配 DMA 一致性缓冲，内容清零
    fn dma_alloc(&self, size: usize) -> core::result::Result<Self::Dma, i32>;
}

/// 总线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PcieState {
    Down = 0,
    Up = 1,
    /// 设备已移除，终态
    Removed = 2,
}

impl PcieState {
    fn from_raw(v: u8) -> Self {
        match v {
            1 => Self::Up,
            2 => Self::Removed,
            _ => Self::Down,
        }
    }
}

const WINDOW_INVALID: u32 = u32::MAX;

struct DevShared<D> {
    dev: D,
    /// 当前 BAR0 窗口
    window: Mutex<u32>,
    /// PCIE2 核心基址，attach 时记录
    pcie2_base: AtomicU32,
    state: AtomicU8,
    observer: Box<dyn BusStateObserver>,
    delay: Box<dyn Delay + Send + Sync>,
}

/// 设备句柄；克隆共享同一窗口与状态
pub struct PcieDev<D> {
    shared: Arc<DevShared<D>>,
}

impl<D> Clone for PcieDev<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: PcieDevice> PcieDev<D> {
    pub fn new(
        dev: D,
        delay: Box<dyn Delay + Send + Sync>,
        observer: Box<dyn BusStateObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(DevShared {
                dev,
                window: Mutex::new(WINDOW_INVALID),
                pcie2_base: AtomicU32::new(0),
                state: AtomicU8::new(PcieState::Down as u8),
                observer,
                delay,
            }),
        }
    }

    pub fn host(&self) -> &D {
        &self.shared.dev
    }

    pub fn delay(&self) -> &dyn Delay {
        &*self.shared.delay
    }

    pub fn state(&self) -> PcieState {
        PcieState::from_raw(self.shared.state.load(Ordering::Acquire))
    }

    /// 状态迁移；进出 Up 时通知观察者。Removed 之后不再迁移
    pub fn change_state(&self, new: PcieState) {
        let old = self.state();
        if old == new || old == PcieState::Removed {
            return;
        }
        self.shared.state.store(new as u8, Ordering::Release);
        log::info!(target: "brcmfmac::pcie", "device state {:?} -> {:?}", old, new);
        if old == PcieState::Up {
            self.shared.observer.bus_state_changed(BusState::Down);
        } else if new == PcieState::Up {
            self.shared.observer.bus_state_changed(BusState::Up);
        }
    }

    fn host_err(&self, code: i32) -> Error {
        let err = Error::from(code);
        if err.is_fatal() {
            log::error!(target: "brcmfmac::pcie", "device gone: {}", err);
            self.change_state(PcieState::Removed);
        }
        err
    }

    fn alive(&self) -> Result<()> {
        if self.state() == PcieState::Removed {
            return Err(Error::Removed);
        }
        Ok(())
    }

    pub fn config_read32(&self, off: u32) -> Result<u32> {
        self.alive()?;
        self.host().config_read32(off).map_err(|e| self.host_err(e))
    }

    pub fn config_write32(&self, off: u32, val: u32) -> Result<()> {
        self.alive()?;
        self.host().config_write32(off, val).map_err(|e| self.host_err(e))
    }

    /// 在 `addr` 所在窗口内执行一次访问；窗口只在变化时重写
    fn windowed<T>(&self, addr: u32, f: impl FnOnce(&D, u32) -> core::result::Result<T, i32>) -> Result<T> {
        self.alive()?;
        let base = addr & !(regs::REG_MAP_SIZE - 1);
        let mut window = self.shared.window.lock();
        if *window != base {
            if let Err(e) = self.host().config_write32(cfg::BAR0_WINDOW, base) {
                *window = WINDOW_INVALID;
                return Err(self.host_err(e));
            }
            *window = base;
        }
        f(self.host(), addr & (regs::REG_MAP_SIZE - 1)).map_err(|e| self.host_err(e))
    }

    /// 背板 32 位读
    pub fn readl(&self, addr: u32) -> Result<u32> {
        self.windowed(addr, |d, off| d.bar0_read32(off))
    }

    pub fn writel(&self, addr: u32, val: u32) -> Result<()> {
        self.windowed(addr, |d, off| d.bar0_write32(off, val))
    }

    fn pcie2_base(&self) -> Result<u32> {
        match self.shared.pcie2_base.load(Ordering::Acquire) {
            0 => Err(Error::IoNotPresent),
            base => Ok(base),
        }
    }

    /// PCIE2 核心寄存器读
    pub fn reg_read32(&self, reg: u32) -> Result<u32> {
        self.readl(self.pcie2_base()? + reg)
    }

    pub fn reg_write32(&self, reg: u32, val: u32) -> Result<()> {
        self.writel(self.pcie2_base()? + reg, val)
    }

    pub fn tcm_read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.alive()?;
        self.host().tcm_read(addr, buf).map_err(|e| self.host_err(e))
    }

    pub fn tcm_write(&self, addr: u32, data: &[u8]) -> Result<()> {
        self.alive()?;
        self.host().tcm_write(addr, data).map_err(|e| self.host_err(e))
    }

    pub fn tcm_read32(&self, addr: u32) -> Result<u32> {
        let mut b = [0u8; 4];
        self.tcm_read(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn tcm_write32(&self, addr: u32, val: u32) -> Result<()> {
        self.tcm_write(addr, &val.to_le_bytes())
    }

    pub fn tcm_read16(&self, addr: u32) -> Result<u16> {
        let mut b = [0u8; 2];
        self.tcm_read(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn tcm_write16(&self, addr: u32, val: u16) -> Result<()> {
        self.tcm_write(addr, &val.to_le_bytes())
    }

    pub fn tcm_write64(&self, addr: u32, val: u64) -> Result<()> {
        self.tcm_write(addr, &val.to_le_bytes())
    }

    pub fn dma_alloc(&self, size: usize) -> Result<D::Dma> {
        self.host().dma_alloc(size).map_err(|e| {
            log::error!(target: "brcmfmac::pcie", "dma alloc of {} bytes failed: {}", size, e);
            Error::NoMemory
        })
    }

    /// 主机 → 设备邮箱门铃，硬件要求写两次
    pub fn ring_sbmbx(&self) -> Result<()> {
        self.config_write32(cfg::SBMBX, 1)?;
        self.config_write32(cfg::SBMBX, 1)
    }

    pub fn intr_enable(&self) -> Result<()> {
        self.reg_write32(pcie2::MAILBOXMASK, regs::int::ENABLED)
    }

    pub fn intr_disable(&self) -> Result<()> {
        self.reg_write32(pcie2::MAILBOXMASK, 0)
    }
}

impl<D: PcieDevice> BuscoreOps for PcieDev<D> {
    fn read32(&self, addr: u32) -> Result<u32> {
        self.readl(addr)
    }

    fn write32(&self, addr: u32, val: u32) -> Result<()> {
        self.writel(addr, val)
    }

    /// 记录 PCIE2 核心并清掉残留的邮箱中断
    fn reset(&self, _info: &ChipInfo, cores: &[Core]) -> Result<()> {
        let Some(core) = cores.iter().find(|c| c.id == core_id::PCIE2) else {
            log::error!(target: "brcmfmac::pcie", "PCIE2 core not found");
            return Err(Error::IoNotPresent);
        };
        self.shared.pcie2_base.store(core.base, Ordering::Release);
        let val = self.reg_read32(pcie2::MAILBOXINT)?;
        if val != u32::MAX && val != 0 {
            self.reg_write32(pcie2::MAILBOXINT, val)?;
        }
        Ok(())
    }

    /// CR4 从 TCM 0 处取复位向量
    fn activate(&self, _info: &ChipInfo, rstvec: u32) -> Result<()> {
        self.tcm_write32(0, rstvec)
    }

    fn udelay(&self, us: u32) {
        self.delay().delay_us(us)
    }
}
