//! SDIO 总线对象
//!
//! [`SdioBus`] 持有芯片（背板访问经 [`SdioDev`]）、传输状态与上层回调，并实现 [`BusOps`]。
//!
//! ## 锁
//!
//! - `inner`：粗粒度总线锁，一次 DPC、一次控制帧发送、一次看门狗检查各持有一次
//! - `ctrl`：控制帧收发的交接区，等待方只持有极短时间
//! - 中断上下文只碰原子量（`ipend`、`dpc_triggered`、`intrcount`）
//!
//! ## 生命周期
//!
//! `attach` → `download` → `init`（进入 Data）→ … → `stop` / `remove`

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use bus::{
    firmware_lookup, BusOps, BusStateObserver, ChipId, ConsoleLines, Delay, Error,
    FirmwareMapping, FirmwareNames, Poll, Result, RxHandler,
};
use chip::regs::{cc, chip_id, core_id};
use chip::Chip;
use mmc::brcm_f0_reg::{CARDCTRL_WLANRESET, SDIO_CCCR_BRCM_CARDCTRL};
use mmc::{sdio_id_match, sdio_set_irq_mask, with_host_claimed, F0Access, SdioFunc};
use skb::{PrioQueue, SkBuff};

use crate::clock::ClkState;
use crate::config::{SdioConfig, SrMode};
use crate::counters::SdioCounters;
use crate::device::{DevState, SdioDev};
use crate::freezer::Freezer;
use crate::glom::GlomPlan;
use crate::regs::{self, f1};
use crate::sdpcm::{TxHeader, MAX_CTL_LEN};

/// 发送队列容量
const TXQLEN: usize = 2048;
/// 高于此长度通知上层停发
pub(crate) const TXHI: usize = TXQLEN - 256;
/// 低于此长度解除停发
pub(crate) const TXLOW: usize = TXHI - 256;

/// 等待控制帧时的轮询步长
const CTRL_WAIT_STEP_US: u32 = 1000;

/// 芯片 → 固件基础名
pub const SDIO_FW_TABLE: &[FirmwareMapping] = &[
    FirmwareMapping::new(chip_id::BCM43143, 0xFFFF_FFFF, "brcmfmac43143-sdio"),
    FirmwareMapping::new(chip_id::BCM43241, 0x0000_001F, "brcmfmac43241b0-sdio"),
    FirmwareMapping::new(chip_id::BCM43241, 0x0000_0020, "brcmfmac43241b4-sdio"),
    FirmwareMapping::new(chip_id::BCM43241, 0xFFFF_FFC0, "brcmfmac43241b5-sdio"),
    FirmwareMapping::new(chip_id::BCM4329, 0xFFFF_FFFF, "brcmfmac4329-sdio"),
    FirmwareMapping::new(chip_id::BCM4330, 0xFFFF_FFFF, "brcmfmac4330-sdio"),
    FirmwareMapping::new(chip_id::BCM4334, 0xFFFF_FFFF, "brcmfmac4334-sdio"),
    FirmwareMapping::new(chip_id::BCM43340, 0xFFFF_FFFF, "brcmfmac43340-sdio"),
    FirmwareMapping::new(chip_id::BCM43341, 0xFFFF_FFFF, "brcmfmac43340-sdio"),
    FirmwareMapping::new(chip_id::BCM4335, 0xFFFF_FFFF, "brcmfmac4335-sdio"),
    FirmwareMapping::new(chip_id::BCM43362, 0xFFFF_FFFE, "brcmfmac43362-sdio"),
    FirmwareMapping::new(chip_id::BCM4339, 0xFFFF_FFFF, "brcmfmac4339-sdio"),
    FirmwareMapping::new(chip_id::BCM43430, 0x0000_0001, "brcmfmac43430a0-sdio"),
    FirmwareMapping::new(chip_id::BCM43430, 0xFFFF_FFFE, "brcmfmac43430-sdio"),
    FirmwareMapping::new(chip_id::BCM4345, 0x0000_0200, "brcmfmac43456-sdio"),
    FirmwareMapping::new(chip_id::BCM4345, 0xFFFF_FDC0, "brcmfmac43455-sdio"),
    FirmwareMapping::new(chip_id::BCM4354, 0xFFFF_FFFF, "brcmfmac4354-sdio"),
    FirmwareMapping::new(chip_id::BCM4356, 0xFFFF_FFFF, "brcmfmac4356-sdio"),
    FirmwareMapping::new(chip_id::BCM4359, 0xFFFF_FFFF, "brcmfmac4359-sdio"),
    FirmwareMapping::new(chip_id::CY4373, 0xFFFF_FFFF, "brcmfmac4373-sdio"),
    FirmwareMapping::new(chip_id::CY43012, 0xFFFF_FFFF, "brcmfmac43012-sdio"),
    FirmwareMapping::new(chip_id::CY43439, 0xFFFF_FFFF, "brcmfmac43439-sdio"),
    FirmwareMapping::new(chip_id::CY43752, 0xFFFF_FFFF, "brcmfmac43752-sdio"),
];

/// 当前读取的帧描述
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CurRead {
    /// 已知的本帧长度（来自上一帧的 nextlen）；0 表示先读头
    pub len: usize,
    pub seq_num: u8,
    pub channel: u8,
    pub len_nxtfrm: usize,
    pub dat_offset: usize,
}

/// 总线锁保护的状态
pub(crate) struct SdioInner {
    pub clkstate: ClkState,
    /// 下载期间只等 ALP
    pub alp_only: bool,
    pub sleeping: bool,
    pub sr_enabled: bool,
    pub activity: bool,

    pub tx_seq: u8,
    pub tx_max: u8,
    pub rx_seq: u8,
    /// bit n 置位表示优先级 n 被设备流控
    pub flowcontrol: u8,
    pub cur_read: CurRead,

    /// 已发 NAK，等待设备 NAKHANDLED
    pub rxskip: bool,
    pub rxpending: bool,
    pub glomd: Option<SkBuff>,
    /// 待读的聚合链；重传时按同一计划重读
    pub glom: Option<GlomPlan>,
    pub glomerr: u32,
    /// DPC 结束、放锁后再交给上层
    pub rx_deliver: Vec<(u8, SkBuff)>,

    pub txq: PrioQueue,
    pub txoff: bool,

    pub hostintmask: u32,
    pub idlecount: u32,
    pub polltick: u32,
    pub console_tick: u32,
    pub console_interval_ms: u32,
    pub console: ConsoleLines,
    pub console_addr: u32,
    pub wowl: bool,
    pub sdpcm_ver: u32,

    pub cnt: SdioCounters,
}

impl SdioInner {
    fn new(config: &SdioConfig) -> Self {
        Self {
            clkstate: ClkState::SdOnly,
            alp_only: false,
            sleeping: false,
            sr_enabled: false,
            activity: false,
            tx_seq: (crate::sdpcm::SEQ_WRAP - 1) as u8,
            tx_max: 0,
            rx_seq: 0,
            flowcontrol: 0,
            cur_read: CurRead::default(),
            rxskip: false,
            rxpending: false,
            glomd: None,
            glom: None,
            glomerr: 0,
            rx_deliver: Vec::new(),
            txq: PrioQueue::new(TXQLEN),
            txoff: false,
            hostintmask: 0,
            idlecount: 0,
            polltick: 0,
            console_tick: 0,
            console_interval_ms: config.console_interval_ms,
            console: ConsoleLines::new(),
            console_addr: 0,
            wowl: false,
            sdpcm_ver: 0,
            cnt: SdioCounters::default(),
        }
    }

    /// 设备流控位图在发送队列下标上的映射
    #[inline]
    pub fn blocked_queues(&self) -> u8 {
        self.flowcontrol.reverse_bits()
    }
}

/// 控制帧交接区
#[derive(Default)]
pub(crate) struct CtrlState {
    /// 待发控制消息（不含帧头）
    pub tx: Option<Vec<u8>>,
    pub tx_result: Option<Result<()>>,
    /// 已收到的控制响应（负载）
    pub rx: Option<Vec<u8>>,
}

/// 802.1D 优先级 → 发送优先级：BE(0) 与 NONE(2) 互换
#[inline]
pub(crate) fn prio2prec(prio: u8) -> usize {
    let prio = prio & 0x7;
    if prio == 0 || prio == 2 {
        (prio ^ 2) as usize
    } else {
        prio as usize
    }
}

/// 发送优先级 → 队列下标（下标小者先出）
#[inline]
pub(crate) fn prec_queue(prec: usize) -> usize {
    7 - prec.min(7)
}

pub struct SdioBus<F: SdioFunc> {
    pub(crate) chip: Chip<SdioDev<F>>,
    pub(crate) config: SdioConfig,
    pub(crate) rx: Box<dyn RxHandler>,
    /// F2 块大小
    pub(crate) blksize: usize,
    pub(crate) tx_hdrlen: usize,
    pub(crate) inner: Mutex<SdioInner>,
    pub(crate) ctrl: Mutex<CtrlState>,
    pub(crate) freezer: Freezer,
    pub(crate) ipend: AtomicBool,
    pub(crate) dpc_triggered: AtomicBool,
    pub(crate) dpc_running: AtomicBool,
    /// 未处理完的中断位
    pub(crate) intstatus: AtomicU32,
    /// 设备 FC_STATE：置位时暂停数据发送
    pub(crate) fcstate: AtomicBool,
    pub(crate) ctrl_frame_stat: AtomicBool,
    pub(crate) intrcount: AtomicU32,
    pub(crate) removed: AtomicBool,
}

impl<F: SdioFunc> SdioBus<F> {
    /// 识别设备并建立芯片对象；成功后设备处于 Down，等待固件下载与 `init`
    pub fn attach(
        func1: F,
        func2: F,
        config: SdioConfig,
        delay: Box<dyn Delay + Send + Sync>,
        observer: Box<dyn BusStateObserver>,
        rx: Box<dyn RxHandler>,
    ) -> Result<Self> {
        let (vendor, device) = (func1.vendor(), func1.device());
        if !sdio_id_match(vendor, device) {
            log::error!(target: "brcmfmac::sdio", "unsupported device {:04x}:{:04x}", vendor, device);
            return Err(Error::WrongType);
        }
        log::info!(target: "brcmfmac::sdio", "attach {:04x}:{:04x}", vendor, device);

        func1.enable_func().map_err(Error::from)?;
        func1.set_block_size(config.f1_blocksize).map_err(Error::from)?;
        func2.set_block_size(config.f2_blocksize).map_err(Error::from)?;

        let dev = SdioDev::new(func1, func2, delay, observer);
        let chip = Chip::attach(dev).inspect_err(|e| {
            log::error!(target: "brcmfmac::sdio", "chip attach failed: {}", e);
        })?;

        let bus = Self {
            blksize: config.f2_blocksize as usize,
            tx_hdrlen: TxHeader::hdrlen(config.txglom),
            inner: Mutex::new(SdioInner::new(&config)),
            ctrl: Mutex::new(CtrlState::default()),
            freezer: Freezer::new(),
            ipend: AtomicBool::new(false),
            dpc_triggered: AtomicBool::new(false),
            dpc_running: AtomicBool::new(false),
            intstatus: AtomicU32::new(0),
            fcstate: AtomicBool::new(false),
            ctrl_frame_stat: AtomicBool::new(false),
            intrcount: AtomicU32::new(0),
            removed: AtomicBool::new(false),
            chip,
            config,
            rx,
        };
        bus.setup_backplane()?;
        Ok(bus)
    }

    /// 卡复位联动背板复位，背板复位联动 PMU 资源重载
    fn setup_backplane(&self) -> Result<()> {
        let dev = self.dev();
        with_host_claimed(dev.func1(), || {
            let cardctrl = dev.f0_readb(SDIO_CCCR_BRCM_CARDCTRL)?;
            dev.f0_writeb(SDIO_CCCR_BRCM_CARDCTRL, cardctrl | CARDCTRL_WLANRESET)?;
            let pmucontrol = self.chip.pmu()?.base + cc::PMUCONTROL;
            let val = dev.readl(pmucontrol)?;
            dev.writel(pmucontrol, val | regs::PMU_CTL_RES_RELOAD)?;
            self.kso_init()
        })
    }

    #[inline]
    pub(crate) fn dev(&self) -> &SdioDev<F> {
        self.chip.ops()
    }

    pub fn chip(&self) -> &Chip<SdioDev<F>> {
        &self.chip
    }

    pub fn config(&self) -> &SdioConfig {
        &self.config
    }

    pub fn device_state(&self) -> DevState {
        self.dev().state()
    }

    pub fn clock_state(&self) -> ClkState {
        self.inner.lock().clkstate
    }

    /// 诊断计数快照
    pub fn counters(&self) -> SdioCounters {
        let mut cnt = self.inner.lock().cnt;
        cnt.intrcount = self.intrcount.load(Ordering::Relaxed);
        cnt
    }

    /// 发送队列是否已要求上层停发
    pub fn tx_flow_blocked(&self) -> bool {
        self.inner.lock().txoff
    }

    /// 设备仍在：未移除且介质未消失，Down 也算
    pub(crate) fn check_present(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::Removed);
        }
        match self.dev().state() {
            DevState::NoMedium => Err(Error::NoMedium),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_alive(&self) -> Result<()> {
        self.check_present()?;
        match self.dev().state() {
            DevState::Data => Ok(()),
            _ => Err(Error::NotReady),
        }
    }

    pub(crate) fn sdio_core_rev(&self) -> u8 {
        self.chip
            .get_core(core_id::SDIO_DEV)
            .map(|c| c.rev)
            .unwrap_or(0)
    }

    /// 唤醒 DPC：中断上下文与等待方共用
    pub(crate) fn trigger_dpc(&self) {
        self.dpc_triggered.store(true, Ordering::Release);
    }

    /// 等待方推进一次：轮询模式下自行标记中断，然后跑 DPC
    fn kick(&self) {
        if self.config.poll {
            self.ipend.store(true, Ordering::Release);
            self.trigger_dpc();
        }
        self.run_dpc();
    }

    /// 移除设备：清空队列，唤醒控制帧等待方，设备进入终态；此后所有调用返回 `Removed`
    pub fn remove(&self) {
        log::info!(target: "brcmfmac::sdio", "remove");
        self.stop();
        self.removed.store(true, Ordering::Release);
        let mut ctrl = self.ctrl.lock();
        ctrl.tx = None;
        ctrl.rx = None;
        ctrl.tx_result = Some(Err(Error::Removed));
        self.ctrl_frame_stat.store(false, Ordering::Release);
        drop(ctrl);
        self.dev().change_state(DevState::NoMedium);
    }

    /// 系统挂起：冻结所有已登记的 worker 后让总线睡眠
    pub fn suspend(&self) -> Result<()> {
        log::info!(target: "brcmfmac::sdio", "suspend, wowl {}", self.inner.lock().wowl);
        self.trigger_dpc();
        self.freezer.freeze(self.dev().delay())?;
        let mut inner = self.inner.lock();
        let res = with_host_claimed(self.dev().func1(), || self.bus_sleep(&mut inner, true, false));
        if let Err(e) = res {
            drop(inner);
            log::error!(target: "brcmfmac::sdio", "suspend sleep failed: {}", e);
            self.freezer.resume(self.dev().delay());
            return Err(e);
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if let Err(e) = self.check_present() {
            self.freezer.resume(self.dev().delay());
            return Err(e);
        }
        let res = {
            let mut inner = self.inner.lock();
            with_host_claimed(self.dev().func1(), || self.bus_sleep(&mut inner, false, false))
        };
        self.freezer.resume(self.dev().delay());
        log::info!(target: "brcmfmac::sdio", "resume");
        res
    }
}

impl<F: SdioFunc> BusOps for SdioBus<F> {
    /// 打开 F2、设置中断掩码并进入 Data
    fn init(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::Removed);
        }
        if self.dev().state() != DevState::Down {
            return Ok(());
        }
        let dev = self.dev();
        let mut inner = self.inner.lock();
        let res = with_host_claimed(dev.func1(), || -> Result<()> {
            self.clkctl(&mut inner, ClkState::Avail, false)?;
            if inner.clkstate != ClkState::Avail {
                return Err(Error::NotReady);
            }
            // 强制 HT 保证 F2 中断能传到主机
            let saveclk = dev.readb(f1::CHIPCLKCSR)?;
            dev.writeb(f1::CHIPCLKCSR, saveclk | regs::FORCE_HT)?;

            dev.core_writel(
                regs::core::TOSBMAILBOXDATA,
                regs::SDPCM_PROT_VERSION << regs::SMB_DATA_VERSION_SHIFT,
            )?;
            if let Err(e) = dev.enable_f2() {
                log::error!(target: "brcmfmac::sdio", "enable F2 failed: {}", e);
                let _ = dev.disable_f2();
                return Err(e);
            }
            inner.hostintmask = regs::int::HOSTINTMASK;
            dev.core_writel(regs::core::HOSTINTMASK, inner.hostintmask)?;
            dev.writeb(f1::WATERMARK, regs::WATERMARK_DEFAULT)?;

            let sr = self.config.sr == SrMode::Auto
                && self.chip.sr_capable().unwrap_or_else(|e| {
                    log::warn!(target: "brcmfmac::sdio", "sr capability check failed: {}", e);
                    false
                });
            if sr {
                self.sr_init(&mut inner)?;
            } else {
                dev.writeb(f1::CHIPCLKCSR, saveclk)?;
            }

            dev.change_state(DevState::Data);
            if !self.config.poll {
                let mask = (1 << dev.func1().num()) | (1 << dev.func2().num());
                if let Err(code) = sdio_set_irq_mask(&F0Access(dev.func1()), mask) {
                    log::error!(target: "brcmfmac::sdio", "intr register failed: {}", code);
                }
            }
            Ok(())
        });

        if let Err(e) = res {
            log::error!(target: "brcmfmac::sdio", "bus init failed: {}", e);
            let _ = with_host_claimed(dev.func1(), || self.clkctl(&mut inner, ClkState::None, false));
            drop(inner);
            let _ = self.checkdied();
            return Err(e);
        }

        // 固件尚未写出共享结构时只是没有控制台
        match with_host_claimed(dev.func1(), || self.readshared()) {
            Ok(sh) => inner.console_addr = sh.console_addr,
            Err(e) => log::debug!(target: "brcmfmac::sdio", "shared info not ready: {}", e),
        }
        log::info!(target: "brcmfmac::sdio", "bus up, clock {:?} sr {}", inner.clkstate, inner.sr_enabled);
        Ok(())
    }

    fn stop(&self) {
        let dev = self.dev();
        if dev.state() != DevState::NoMedium {
            let mut inner = self.inner.lock();
            let res = with_host_claimed(dev.func1(), || -> Result<()> {
                self.bus_sleep(&mut inner, false, false)?;
                dev.core_writel(regs::core::HOSTINTMASK, 0)?;
                let local_mask = core::mem::take(&mut inner.hostintmask);
                let saveclk = dev.readb(f1::CHIPCLKCSR)?;
                dev.writeb(f1::CHIPCLKCSR, saveclk | regs::FORCE_HT)?;
                dev.disable_f2()?;
                dev.core_writel(regs::core::INTSTATUS, local_mask)
            });
            if let Err(e) = res {
                log::warn!(target: "brcmfmac::sdio", "stop: {}", e);
            }
        }
        dev.change_state(DevState::Down);

        let mut inner = self.inner.lock();
        let purged = inner.txq.purge();
        inner.glomd = None;
        inner.glom = None;
        inner.rx_deliver.clear();
        inner.rxskip = false;
        inner.tx_seq = 0;
        inner.rx_seq = 0;
        inner.cur_read = CurRead::default();
        drop(inner);
        self.intstatus.store(0, Ordering::Release);

        let mut ctrl = self.ctrl.lock();
        ctrl.rx = None;
        if ctrl.tx.take().is_some() {
            ctrl.tx_result = Some(Err(Error::NotReady));
        }
        self.ctrl_frame_stat.store(false, Ordering::Release);
        log::info!(target: "brcmfmac::sdio", "bus stopped, {} queued frames dropped", purged);
    }

    fn txdata(&self, mut skb: SkBuff) -> Result<()> {
        self.check_alive()?;
        let prec = prio2prec(skb.priority());
        if !skb.push(self.tx_hdrlen) {
            let prio = skb.priority();
            skb = SkBuff::from_slice(skb.data(), self.tx_hdrlen + self.config.head_align);
            skb.set_priority(prio);
            skb.push(self.tx_hdrlen);
        }

        let mut inner = self.inner.lock();
        inner.cnt.fcqueued += 1;
        if inner.txq.enqueue(skb, prec_queue(prec)).is_err() {
            log::error!(target: "brcmfmac::sdio", "tx queue full");
            return Err(Error::Busy);
        }
        if inner.txq.len() >= TXHI && !inner.txoff {
            inner.txoff = true;
            log::debug!(target: "brcmfmac::sdio", "tx flow blocked at {}", inner.txq.len());
        }
        drop(inner);
        self.trigger_dpc();
        Ok(())
    }

    fn txctl(&self, msg: &[u8]) -> Result<()> {
        self.check_alive()?;
        if msg.len() + self.tx_hdrlen > MAX_CTL_LEN {
            return Err(Error::InvalidArgument);
        }
        {
            let mut ctrl = self.ctrl.lock();
            ctrl.tx = Some(msg.to_vec());
            ctrl.tx_result = None;
        }
        self.ctrl_frame_stat.store(true, Ordering::Release);
        self.trigger_dpc();

        let retries = self.config.ctrl_timeout_ms.saturating_mul(1000) / CTRL_WAIT_STEP_US;
        let res = bus::retry_with_interval(
            self.dev().delay(),
            retries.max(1),
            CTRL_WAIT_STEP_US,
            "control frame send",
            |_| {
                if let Some(r) = self.ctrl.lock().tx_result.take() {
                    return r.map(Poll::Ready);
                }
                self.check_alive()?;
                self.kick();
                Ok(Poll::Pending)
            },
        );

        let mut inner = self.inner.lock();
        match res {
            Ok(()) => inner.cnt.tx_ctlpkts += 1,
            Err(e) => {
                inner.cnt.tx_ctlerrs += 1;
                drop(inner);
                let mut ctrl = self.ctrl.lock();
                ctrl.tx = None;
                ctrl.tx_result = None;
                self.ctrl_frame_stat.store(false, Ordering::Release);
                log::error!(target: "brcmfmac::sdio", "control frame send failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn rxctl(&self, buf: &mut [u8]) -> Result<usize> {
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::Removed);
        }
        let retries = self.config.ctrl_timeout_ms.saturating_mul(1000) / CTRL_WAIT_STEP_US;
        let frame = bus::retry_with_interval(
            self.dev().delay(),
            retries.max(1),
            CTRL_WAIT_STEP_US,
            "control response",
            |_| {
                if let Some(frame) = self.ctrl.lock().rx.take() {
                    return Ok(Poll::Ready(frame));
                }
                self.check_alive()?;
                self.kick();
                Ok(Poll::Pending)
            },
        );
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                log::error!(target: "brcmfmac::sdio", "control response: {}", e);
                self.inner.lock().cnt.rx_ctlerrs += 1;
                return Err(e);
            }
        };
        let n = frame.len().min(buf.len());
        if n < frame.len() {
            log::warn!(
                target: "brcmfmac::sdio",
                "control response truncated: {} > {}",
                frame.len(),
                buf.len()
            );
        }
        buf[..n].copy_from_slice(&frame[..n]);
        self.inner.lock().cnt.rx_ctlpkts += 1;
        Ok(n)
    }

    fn get_ramsize(&self) -> u32 {
        let info = self.chip.info();
        info.ramsize - info.srsize
    }

    fn get_memdump(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_present()?;
        let info = self.chip.info();
        let n = buf.len().min(info.ramsize as usize);
        let mut inner = self.inner.lock();
        with_host_claimed(self.dev().func1(), || {
            self.bus_sleep(&mut inner, false, false)?;
            self.dev().ram_read(info.rambase, &mut buf[..n])
        })?;
        Ok(n)
    }

    fn chip_id(&self) -> ChipId {
        self.chip.id()
    }

    fn firmware_name(&self) -> Option<FirmwareNames> {
        firmware_lookup(SDIO_FW_TABLE, self.chip.id())
    }

    fn wowl_config(&self, enabled: bool) {
        log::debug!(target: "brcmfmac::sdio", "wowl {}", enabled);
        self.inner.lock().wowl = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_effort_outranks_background() {
        assert_eq!(prio2prec(0), 2);
        assert_eq!(prio2prec(2), 0);
        assert_eq!(prio2prec(7), 7);
        assert!(prec_queue(prio2prec(0)) < prec_queue(prio2prec(1)));
        assert_eq!(prec_queue(7), 0);
    }

    #[test]
    fn flow_bits_map_to_queue_index() {
        let mut inner = SdioInner::new(&SdioConfig::default());
        inner.flowcontrol = 1 << 2;
        assert_eq!(inner.blocked_queues(), 1 << prec_queue(2));
    }

    #[test]
    fn firmware_table_has_rev_split() {
        let a0 = firmware_lookup(SDIO_FW_TABLE, ChipId { chip: chip_id::BCM43430, chiprev: 0 });
        let a1 = firmware_lookup(SDIO_FW_TABLE, ChipId { chip: chip_id::BCM43430, chiprev: 1 });
        assert_eq!(a0.map(|n| n.firmware), Some("brcmfmac43430a0-sdio"));
        assert_eq!(a1.map(|n| n.firmware), Some("brcmfmac43430-sdio"));
    }
}
