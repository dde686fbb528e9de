//! PCIe 总线对象
//!
//! [`PcieBus`] 持有芯片（背板访问经 [`PcieDev`] 的 BAR0 窗口）、共享结构、消息环与上层回调，并实现 [`BusOps`]。
//!
//! ## 生命周期
//!
//! `attach` → `download`（等固件写出共享结构地址）→ `init`（建环、开中断、进入 Up）→ … → `stop` / `remove`
//!
//! 数据面走消息环：控制消息经 [`BusOps::txctl`]/[`BusOps::rxctl`] 落在控制提交/完成环上，
//! 数据帧由上层协议构造成环条目后经 [`PcieBus::ring_submit`] 或流环提交。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use bus::{
    firmware_lookup, nvram_image, BusOps, BusStateObserver, ChipId, Delay, Error,
    FirmwareMapping, FirmwareNames, Poll, Result,
};
use chip::regs::{chip_id, core_id};
use chip::Chip;
use skb::SkBuff;

use crate::config::PcieConfig;
use crate::counters::PcieCounters;
use crate::device::{PcieDev, PcieDevice, PcieState};
use crate::regs::{self, pcie2};
use crate::ring::{CommonRingId, PcieRings};
use crate::shared::{PcieConsole, PcieShared};

/// 等待控制消息时的轮询步长
const CTRL_WAIT_STEP_US: u32 = 1000;

/// 芯片 → 固件基础名
pub const PCIE_FW_TABLE: &[FirmwareMapping] = &[
    FirmwareMapping::new(chip_id::BCM43602, 0xFFFF_FFFF, "brcmfmac43602-pcie"),
    FirmwareMapping::new(chip_id::BCM43465, 0xFFFF_FFF0, "brcmfmac4366c-pcie"),
    FirmwareMapping::new(chip_id::BCM4350, 0x0000_00FF, "brcmfmac4350c2-pcie"),
    FirmwareMapping::new(chip_id::BCM4350, 0xFFFF_FF00, "brcmfmac4350-pcie"),
    FirmwareMapping::new(chip_id::BCM43525, 0xFFFF_FFF0, "brcmfmac4365c-pcie"),
    FirmwareMapping::new(chip_id::BCM4356, 0xFFFF_FFFF, "brcmfmac4356-pcie"),
    FirmwareMapping::new(chip_id::BCM43567, 0xFFFF_FFFF, "brcmfmac43570-pcie"),
    FirmwareMapping::new(chip_id::BCM43569, 0xFFFF_FFFF, "brcmfmac43570-pcie"),
    FirmwareMapping::new(chip_id::BCM43570, 0xFFFF_FFFF, "brcmfmac43570-pcie"),
    FirmwareMapping::new(chip_id::BCM4358, 0xFFFF_FFFF, "brcmfmac4358-pcie"),
    FirmwareMapping::new(chip_id::BCM4359, 0xFFFF_FFFF, "brcmfmac4359-pcie"),
    FirmwareMapping::new(chip_id::BCM4364, 0xFFFF_FFFF, "brcmfmac4364-pcie"),
    FirmwareMapping::new(chip_id::BCM4365, 0x0000_000F, "brcmfmac4365b-pcie"),
    FirmwareMapping::new(chip_id::BCM4365, 0xFFFF_FFF0, "brcmfmac4365c-pcie"),
    FirmwareMapping::new(chip_id::BCM4366, 0x0000_000F, "brcmfmac4366b-pcie"),
    FirmwareMapping::new(chip_id::BCM4366, 0xFFFF_FFF0, "brcmfmac4366c-pcie"),
    FirmwareMapping::new(chip_id::BCM43664, 0xFFFF_FFF0, "brcmfmac4366c-pcie"),
    FirmwareMapping::new(chip_id::BCM43666, 0xFFFF_FFF0, "brcmfmac4366c-pcie"),
    FirmwareMapping::new(chip_id::BCM4371, 0xFFFF_FFFF, "brcmfmac4371-pcie"),
];

/// 消息环的消费方（msgbuf 协议层），设备门铃到达时被通知
pub trait RingConsumer: Send + Sync {
    fn rings_ready(&self);
}

/// 不消费
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConsumer;

impl RingConsumer for NoConsumer {
    fn rings_ready(&self) {}
}

/// 总线锁保护的状态
pub(crate) struct PcieInner {
    /// 可用 RAM 大小（固件镜像可声明）
    pub ramsize: u32,
    /// 固件写出的共享结构地址
    pub shared_addr: u32,
    pub shared: Option<PcieShared>,
    pub console: PcieConsole,
    pub cnt: PcieCounters,
}

pub struct PcieBus<D: PcieDevice> {
    pub(crate) chip: Chip<PcieDev<D>>,
    pub(crate) config: PcieConfig,
    pub(crate) consumer: Box<dyn RingConsumer>,
    pub(crate) inner: Mutex<PcieInner>,
    pub(crate) rings: Mutex<Option<Arc<PcieRings<D>>>>,
    /// 收到 D3 应答
    pub(crate) mbdata_completed: AtomicBool,
    pub(crate) intrcount: AtomicU32,
    pub(crate) spurious: AtomicU32,
}

impl<D: PcieDevice> PcieBus<D> {
    /// 识别设备并建立芯片对象；成功后总线处于 Down，等待固件下载与 `init`
    pub fn attach(
        dev: D,
        config: PcieConfig,
        delay: Box<dyn Delay + Send + Sync>,
        observer: Box<dyn BusStateObserver>,
        consumer: Box<dyn RingConsumer>,
    ) -> Result<Self> {
        let (vendor, device) = (dev.vendor(), dev.device());
        if !regs::pcie_id_match(vendor, device) {
            log::error!(target: "brcmfmac::pcie", "unsupported device {:04x}:{:04x}", vendor, device);
            return Err(Error::WrongType);
        }
        log::info!(target: "brcmfmac::pcie", "attach {:04x}:{:04x}", vendor, device);

        let dev = PcieDev::new(dev, delay, observer);
        let chip = Chip::attach(dev).inspect_err(|e| {
            log::error!(target: "brcmfmac::pcie", "chip attach failed: {}", e);
        })?;
        if chip.get_core(core_id::PCIE2).is_none() {
            return Err(Error::IoNotPresent);
        }
        let ramsize = chip.info().ramsize;
        Ok(Self {
            chip,
            config,
            consumer,
            inner: Mutex::new(PcieInner {
                ramsize,
                shared_addr: 0,
                shared: None,
                console: PcieConsole::new(),
                cnt: PcieCounters::default(),
            }),
            rings: Mutex::new(None),
            mbdata_completed: AtomicBool::new(false),
            intrcount: AtomicU32::new(0),
            spurious: AtomicU32::new(0),
        })
    }

    #[inline]
    pub(crate) fn dev(&self) -> &PcieDev<D> {
        self.chip.ops()
    }

    pub fn chip(&self) -> &Chip<PcieDev<D>> {
        &self.chip
    }

    pub fn config(&self) -> &PcieConfig {
        &self.config
    }

    pub fn state(&self) -> PcieState {
        self.dev().state()
    }

    pub fn shared(&self) -> Option<PcieShared> {
        self.inner.lock().shared
    }

    /// 诊断计数快照
    pub fn counters(&self) -> PcieCounters {
        let mut cnt = self.inner.lock().cnt;
        cnt.intrcount = self.intrcount.load(Ordering::Relaxed);
        cnt.spurious = self.spurious.load(Ordering::Relaxed);
        cnt
    }

    pub(crate) fn check_up(&self) -> Result<()> {
        match self.dev().state() {
            PcieState::Up => Ok(()),
            PcieState::Down => Err(Error::NotReady),
            PcieState::Removed => Err(Error::Removed),
        }
    }

    pub(crate) fn rings(&self) -> Result<Arc<PcieRings<D>>> {
        self.rings.lock().clone().ok_or(Error::NotReady)
    }

    /// 提交一个条目到公共提交环
    pub fn ring_submit(&self, id: CommonRingId, item: &[u8]) -> Result<()> {
        self.check_up()?;
        let rings = self.rings()?;
        let res = rings.common(id).submit(item);
        let mut inner = self.inner.lock();
        match res {
            Ok(()) => inner.cnt.h2d_items += 1,
            Err(Error::Busy) => inner.cnt.ring_full += 1,
            Err(_) => {}
        }
        res
    }

    /// 消费公共完成环上至多 `max` 个条目
    pub fn ring_consume(&self, id: CommonRingId, max: usize, f: impl FnMut(&[u8])) -> Result<usize> {
        if self.dev().state() == PcieState::Removed {
            return Err(Error::Removed);
        }
        let rings = self.rings()?;
        let n = rings.common(id).consume(max, f)?;
        self.inner.lock().cnt.d2h_items += n as u32;
        Ok(n)
    }

    pub fn max_flowrings(&self) -> u16 {
        self.rings().map(|r| r.max_flowrings()).unwrap_or(0)
    }

    /// 为流环分配 DMA 缓冲，返回其设备地址
    pub fn flowring_create(&self, flowid: u16) -> Result<u64> {
        self.check_up()?;
        self.rings()?.flowring_create(self.dev(), flowid)
    }

    pub fn flowring_submit(&self, flowid: u16, item: &[u8]) -> Result<()> {
        self.check_up()?;
        let rings = self.rings()?;
        let res = rings.flowring(flowid)?.submit(item);
        let mut inner = self.inner.lock();
        match res {
            Ok(()) => inner.cnt.h2d_items += 1,
            Err(Error::Busy) => inner.cnt.ring_full += 1,
            Err(_) => {}
        }
        res
    }

    pub fn flowring_delete(&self, flowid: u16) -> Result<()> {
        self.rings()?.flowring_delete(flowid)
    }

    /// 读取固件控制台，返回输出的行数
    pub fn poll_console(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let n = inner.console.drain(self.dev())?;
        inner.cnt.console_lines += n as u32;
        Ok(n)
    }

    /// 移除设备：停止总线，此后所有调用返回 `Removed`
    pub fn remove(&self) {
        log::info!(target: "brcmfmac::pcie", "remove");
        self.stop();
        self.dev().change_state(PcieState::Removed);
    }

    /// 按共享结构的约定通知固件主机已就绪
    pub(crate) fn hostready(&self, sh: &PcieShared) -> Result<()> {
        if sh.hostready_db1() {
            self.dev().reg_write32(pcie2::H2D_MAILBOX_1, 1)?;
        }
        Ok(())
    }

    /// 固件镜像可在固定偏移处声明 RAM 大小
    pub(crate) fn adjust_ramsize(&self, fw: &[u8]) {
        let off = regs::RAMSIZE_OFFSET;
        if fw.len() < off + 8 {
            return;
        }
        let word = |o: usize| u32::from_le_bytes([fw[o], fw[o + 1], fw[o + 2], fw[o + 3]]);
        if word(off) != regs::RAMSIZE_MAGIC {
            return;
        }
        let ramsize = word(off + 4);
        if ramsize == 0 || ramsize > self.chip.info().ramsize {
            log::warn!(target: "brcmfmac::pcie", "ignoring firmware ramsize {:#x}", ramsize);
            return;
        }
        log::info!(target: "brcmfmac::pcie", "firmware declares ramsize {:#x}", ramsize);
        self.inner.lock().ramsize = ramsize;
    }

    /// 写入固件与 NVRAM、启动 CPU 并等待共享结构地址；成功后调用 `init` 进入 Up
    pub fn download(&self, fw: &[u8], nvram: &[u8]) -> Result<()> {
        match self.dev().state() {
            PcieState::Up => return Err(Error::Busy),
            PcieState::Removed => return Err(Error::Removed),
            PcieState::Down => {}
        }
        if fw.len() < 4 {
            return Err(Error::InvalidArgument);
        }
        self.adjust_ramsize(fw);
        let rambase = self.chip.info().rambase;
        let ramsize = self.inner.lock().ramsize;
        let nvimg = (!nvram.is_empty()).then(|| nvram_image(nvram));
        let nvlen = nvimg.as_ref().map_or(0, |v| v.len());
        if fw.len() + nvlen + 4 > ramsize as usize {
            log::error!(
                target: "brcmfmac::pcie",
                "image does not fit: fw {} nvram {} ram {}",
                fw.len(),
                nvlen,
                ramsize
            );
            return Err(Error::InvalidArgument);
        }
        let rstvec = u32::from_le_bytes([fw[0], fw[1], fw[2], fw[3]]);
        let dev = self.dev();

        self.chip.set_passive()?;
        dev.tcm_write(rambase, fw)?;
        log::info!(target: "brcmfmac::pcie", "firmware {} bytes written", fw.len());

        // 最后一个字作为就绪标志：固件启动后在此写入共享结构地址
        let sentinel = rambase + ramsize - 4;
        let written = match &nvimg {
            Some(img) => {
                let addr = rambase + ramsize - img.len() as u32;
                dev.tcm_write(addr, img)?;
                log::debug!(target: "brcmfmac::pcie", "nvram {} bytes @ {:#x}", img.len(), addr);
                dev.tcm_read32(sentinel)?
            }
            None => {
                dev.tcm_write32(sentinel, 0)?;
                0
            }
        };

        self.chip.set_active(rstvec)?;

        let addr = bus::retry_with_interval(
            dev.delay(),
            self.config.ready_retries,
            self.config.ready_interval_ms.saturating_mul(1000),
            "firmware ready",
            |_| {
                let v = dev.tcm_read32(sentinel)?;
                Ok(if v != written { Poll::Ready(v) } else { Poll::Pending })
            },
        )
        .map_err(|e| match e {
            Error::TimedOut { .. } => {
                log::error!(target: "brcmfmac::pcie", "firmware failed to initialize");
                Error::FirmwareInit
            }
            e => e,
        })?;

        if addr < rambase || addr >= rambase + ramsize {
            log::error!(target: "brcmfmac::pcie", "invalid shared address {:#x}", addr);
            return Err(Error::FirmwareInit);
        }
        log::info!(target: "brcmfmac::pcie", "firmware up, shared @ {:#x}", addr);
        self.inner.lock().shared_addr = addr;
        Ok(())
    }

    fn teardown(&self) {
        self.rings.lock().take();
        self.inner.lock().shared = None;
    }
}

impl<D: PcieDevice> BusOps for PcieBus<D> {
    /// 解析共享结构、建环、开中断并进入 Up
    fn init(&self) -> Result<()> {
        match self.dev().state() {
            PcieState::Up => return Ok(()),
            PcieState::Removed => return Err(Error::Removed),
            PcieState::Down => {}
        }
        let addr = self.inner.lock().shared_addr;
        if addr == 0 {
            return Err(Error::NotReady);
        }
        let dev = self.dev();
        let res = (|| -> Result<()> {
            let sh = PcieShared::read(dev, addr)?;
            let rings = PcieRings::setup(dev, &sh, self.config.dma_index)?;
            {
                let mut inner = self.inner.lock();
                if let Err(e) = inner.console.init(dev, sh.console_addr) {
                    log::warn!(target: "brcmfmac::pcie", "console unavailable: {}", e);
                }
                inner.shared = Some(sh);
            }
            *self.rings.lock() = Some(Arc::new(rings));
            dev.change_state(PcieState::Up);
            dev.intr_enable()?;
            self.hostready(&sh)
        })();
        if let Err(e) = res {
            log::error!(target: "brcmfmac::pcie", "bus init failed: {}", e);
            let _ = dev.intr_disable();
            dev.change_state(PcieState::Down);
            self.teardown();
            return Err(e);
        }
        log::info!(target: "brcmfmac::pcie", "bus up");
        Ok(())
    }

    fn stop(&self) {
        let dev = self.dev();
        if dev.state() != PcieState::Removed {
            if let Err(e) = dev.intr_disable() {
                log::warn!(target: "brcmfmac::pcie", "stop: {}", e);
            }
        }
        dev.change_state(PcieState::Down);
        self.teardown();
        log::info!(target: "brcmfmac::pcie", "bus stopped");
    }

    /// 数据帧须由协议层构造成环条目，本接口不承载
    fn txdata(&self, _skb: SkBuff) -> Result<()> {
        self.check_up()?;
        log::debug!(target: "brcmfmac::pcie", "txdata goes through the message rings");
        Err(Error::Unsupported)
    }

    fn txctl(&self, msg: &[u8]) -> Result<()> {
        self.ring_submit(CommonRingId::CtrlSubmit, msg).inspect_err(|e| {
            log::error!(target: "brcmfmac::pcie", "control message submit failed: {}", e);
        })
    }

    fn rxctl(&self, buf: &mut [u8]) -> Result<usize> {
        let retries = self.config.ctrl_timeout_ms.saturating_mul(1000) / CTRL_WAIT_STEP_US;
        bus::retry_with_interval(
            self.dev().delay(),
            retries.max(1),
            CTRL_WAIT_STEP_US,
            "control response",
            |_| {
                self.check_up()?;
                let mut got = 0;
                let n = self.ring_consume(CommonRingId::CtrlComplete, 1, |item| {
                    got = item.len().min(buf.len());
                    buf[..got].copy_from_slice(&item[..got]);
                })?;
                Ok(if n == 0 { Poll::Pending } else { Poll::Ready(got) })
            },
        )
        .inspect_err(|e| log::error!(target: "brcmfmac::pcie", "control response: {}", e))
    }

    fn get_ramsize(&self) -> u32 {
        self.inner.lock().ramsize.saturating_sub(self.chip.info().srsize)
    }

    fn get_memdump(&self, buf: &mut [u8]) -> Result<usize> {
        let rambase = self.chip.info().rambase;
        let n = buf.len().min(self.inner.lock().ramsize as usize);
        self.dev().tcm_read(rambase, &mut buf[..n])?;
        Ok(n)
    }

    fn chip_id(&self) -> ChipId {
        self.chip.id()
    }

    fn firmware_name(&self) -> Option<FirmwareNames> {
        firmware_lookup(PCIE_FW_TABLE, self.chip.id())
    }

    fn wowl_config(&self, enabled: bool) {
        log::debug!(target: "brcmfmac::pcie", "wowl {} ignored", enabled);
    }
}
