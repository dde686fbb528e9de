//! 中断、DPC 与看门狗
//!
//! 中断上下文只置 `ipend` 与 `dpc_triggered`；DPC 在总线锁内读取并清除设备中断状态，
//! 依次处理邮箱、收帧、控制帧与数据发送。交付给上层的帧在放锁之后才回调。

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use bus::{Error, Result};
use mmc::{with_host_claimed, SdioFunc, SDIO_CCCR_INT_PENDING};

use crate::bus::{SdioBus, SdioInner};
use crate::clock::ClkState;
use crate::device::DevState;
use crate::freezer::WorkerGuard;
use crate::regs::{self, hmb, int};
use crate::sdpcm::{data_ok, Channel};

/// 单次 `run_dpc` 的最多轮数
const MAX_DPC_PASSES: u32 = 64;
/// worker 空闲时的检查间隔
const DPC_IDLE_US: u32 = 500;

impl<F: SdioFunc> SdioBus<F> {
    /// 中断入口
    pub fn isr(&self) {
        self.intrcount.fetch_add(1, Ordering::Relaxed);
        self.ipend.store(true, Ordering::Release);
        if self.config.poll {
            log::error!(target: "brcmfmac::sdio", "isr w/o interrupt configured");
        }
        self.trigger_dpc();
    }

    /// 读取并清除设备中断，累加到待处理位
    pub(crate) fn intr_rstatus(&self, inner: &mut SdioInner) -> Result<u32> {
        let dev = self.dev();
        let val = dev.core_readl(regs::core::INTSTATUS)?;
        inner.cnt.f1regdata += 1;
        let val = val & inner.hostintmask;
        self.fcstate.store(val & int::HMB_FC_STATE != 0, Ordering::Release);
        if val != 0 {
            dev.core_writel(regs::core::INTSTATUS, val)?;
            inner.cnt.f1regdata += 1;
            self.intstatus.fetch_or(val, Ordering::AcqRel);
        }
        Ok(val)
    }

    /// 处理 to-host 邮箱，返回需要追加处理的中断位
    fn hostmail(&self, inner: &mut SdioInner) -> Result<u32> {
        let dev = self.dev();
        let mut intstatus = 0;
        let hmb_data = dev.core_readl(regs::core::TOHOSTMAILBOXDATA)?;
        dev.core_writel(regs::core::TOSBMAILBOX, regs::SMB_INT_ACK)?;
        inner.cnt.f1regdata += 2;

        if hmb_data & hmb::FWHALT != 0 {
            log::error!(target: "brcmfmac::sdio", "mailbox indicates firmware halted");
            if let Err(e) = self.checkdied_claimed() {
                log::warn!(target: "brcmfmac::sdio", "crash info unavailable: {}", e);
            }
        }

        if hmb_data & hmb::NAKHANDLED != 0 {
            log::debug!(target: "brcmfmac::sdio", "NAK handled, expect rtx of {}", inner.rx_seq);
            if !inner.rxskip {
                log::error!(target: "brcmfmac::sdio", "unexpected NAKHANDLED");
            }
            inner.rxskip = false;
            intstatus |= int::HMB_FRAME_IND;
        }

        if hmb_data & (hmb::DEVREADY | hmb::FWREADY) != 0 {
            inner.sdpcm_ver = (hmb_data & hmb::VERSION_MASK) >> hmb::VERSION_SHIFT;
            if inner.sdpcm_ver != regs::SDPCM_PROT_VERSION {
                log::error!(
                    target: "brcmfmac::sdio",
                    "version mismatch, dongle reports {}, expecting {}",
                    inner.sdpcm_ver,
                    regs::SDPCM_PROT_VERSION
                );
            } else {
                log::debug!(target: "brcmfmac::sdio", "dongle ready, protocol version {}", inner.sdpcm_ver);
            }
            if let Ok(sh) = self.readshared() {
                inner.console_addr = sh.console_addr;
            }
        }

        // 老固件的带外流控
        if hmb_data & hmb::FC != 0 {
            let fcbits = ((hmb_data & hmb::FCDATA_MASK) >> hmb::FCDATA_SHIFT) as u8;
            if fcbits & !inner.flowcontrol != 0 {
                inner.cnt.fc_xoff += 1;
            }
            if inner.flowcontrol & !fcbits != 0 {
                inner.cnt.fc_xon += 1;
            }
            inner.cnt.fc_rcvd += 1;
            inner.flowcontrol = fcbits;
        }

        if hmb_data & !hmb::KNOWN != 0 {
            log::error!(target: "brcmfmac::sdio", "unknown mailbox data content: {:#x}", hmb_data);
        }
        Ok(intstatus)
    }

    fn dpc(&self, inner: &mut SdioInner) {
        let dev = self.dev();
        let mut err: Option<Error> = None;

        if !inner.sr_enabled && inner.clkstate == ClkState::Pending {
            match dev.readb(regs::f1::CHIPCLKCSR) {
                Ok(csr) if regs::ht_avail(csr) => {
                    let res = dev.readb(regs::f1::DEVICE_CTL).and_then(|devctl| {
                        dev.writeb(regs::f1::DEVICE_CTL, devctl & !regs::DEVCTL_CA_INT_ONLY)
                    });
                    if let Err(e) = res {
                        err = Some(e);
                    }
                    inner.clkstate = ClkState::Avail;
                }
                Ok(_) => {}
                Err(e) => err = Some(e),
            }
        }

        if let Err(e) = self.bus_sleep(inner, false, true) {
            log::debug!(target: "brcmfmac::sdio", "wake failed: {}", e);
        }

        if self.ipend.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.intr_rstatus(inner) {
                err = Some(e);
            }
        }

        let mut intstatus = self.intstatus.swap(0, Ordering::AcqRel);

        // 读回新状态防止 ack 与下一次变化交叉；仍在变化时先按流控处理
        if intstatus & int::HMB_FC_CHANGE != 0 {
            intstatus &= !int::HMB_FC_CHANGE;
            let res = dev
                .core_writel(regs::core::INTSTATUS, int::HMB_FC_CHANGE)
                .and_then(|_| dev.core_readl(regs::core::INTSTATUS));
            inner.cnt.f1regdata += 2;
            match res {
                Ok(newstatus) => {
                    self.fcstate.store(
                        newstatus & (int::HMB_FC_STATE | int::HMB_FC_CHANGE) != 0,
                        Ordering::Release,
                    );
                    intstatus |= newstatus & inner.hostintmask;
                }
                Err(e) => err = Some(e),
            }
        }

        if intstatus & int::HMB_HOST_INT != 0 {
            intstatus &= !int::HMB_HOST_INT;
            match self.hostmail(inner) {
                Ok(bits) => intstatus |= bits,
                Err(e) => err = Some(e),
            }
        }

        if intstatus & int::WR_OOSYNC != 0 {
            log::error!(target: "brcmfmac::sdio", "dongle reports WR_OOSYNC");
            intstatus &= !int::WR_OOSYNC;
        }
        if intstatus & int::RD_OOSYNC != 0 {
            log::error!(target: "brcmfmac::sdio", "dongle reports RD_OOSYNC");
            intstatus &= !int::RD_OOSYNC;
        }
        if intstatus & int::SBINT != 0 {
            log::error!(target: "brcmfmac::sdio", "dongle reports SBINT");
            intstatus &= !int::SBINT;
        }
        if intstatus & int::CHIPACTIVE != 0 {
            log::debug!(target: "brcmfmac::sdio", "dongle reports CHIPACTIVE");
            intstatus &= !int::CHIPACTIVE;
        }

        if inner.rxskip {
            intstatus &= !int::HMB_FRAME_IND;
        }
        if intstatus & int::HMB_FRAME_IND != 0 && inner.clkstate == ClkState::Avail {
            self.readframes(inner, self.config.rxbound);
            if !inner.rxpending {
                intstatus &= !int::HMB_FRAME_IND;
            }
        }

        if intstatus != 0 {
            self.intstatus.fetch_or(intstatus, Ordering::AcqRel);
        }

        if self.ctrl_frame_stat.load(Ordering::Acquire)
            && inner.clkstate == ClkState::Avail
            && data_ok(inner.tx_seq, inner.tx_max)
        {
            self.service_ctrl_frame(inner);
        }

        let blocked = inner.blocked_queues();
        if inner.clkstate == ClkState::Avail
            && !self.fcstate.load(Ordering::Acquire)
            && inner.txq.len_unblocked(blocked) > 0
            && self.config.txbound > 0
            && data_ok(inner.tx_seq, inner.tx_max)
        {
            let framecnt = if inner.rxpending {
                self.config.txbound.min(self.config.txminmax)
            } else {
                self.config.txbound
            };
            self.sendfromq(inner, framecnt);
        }

        let state = dev.state();
        if state != DevState::Data || err.is_some() {
            log::error!(target: "brcmfmac::sdio", "failed backplane access over SDIO, halting operation");
            self.intstatus.store(0, Ordering::Release);
            let reason = match (state, err) {
                (DevState::NoMedium, _) => Error::NoMedium,
                (_, Some(e)) if e.is_fatal() => e,
                _ => Error::NotReady,
            };
            self.fail_ctrl_frame(reason);
        } else if self.intstatus.load(Ordering::Acquire) != 0
            || self.ipend.load(Ordering::Acquire)
            || (!self.fcstate.load(Ordering::Acquire)
                && inner.txq.len_unblocked(inner.blocked_queues()) > 0
                && data_ok(inner.tx_seq, inner.tx_max))
        {
            self.trigger_dpc();
        }
    }

    /// 处理所有挂起的工作；收到的帧在放锁后交给上层
    pub fn run_dpc(&self) {
        let mut passes = 0;
        while self.dpc_triggered.swap(false, Ordering::AcqRel) {
            self.dpc_running.store(true, Ordering::Release);
            let delivered: Vec<(u8, skb::SkBuff)> = {
                let mut inner = self.inner.lock();
                with_host_claimed(self.dev().func1(), || self.dpc(&mut inner));
                core::mem::take(&mut inner.rx_deliver)
            };
            self.dpc_running.store(false, Ordering::Release);

            for (channel, skb) in delivered {
                if channel == Channel::Event as u8 {
                    self.rx.rx_event(skb);
                } else {
                    self.rx.rx_data(skb);
                }
            }
            passes += 1;
            if passes >= MAX_DPC_PASSES {
                log::debug!(target: "brcmfmac::sdio", "dpc yielding after {} passes", passes);
                break;
            }
        }
    }

    /// 看门狗周期：轮询中断、读控制台、空闲关时钟。返回 false 表示总线已进入空闲睡眠
    pub fn watchdog(&self) -> bool {
        let dev = self.dev();
        if dev.state() != DevState::Data {
            return false;
        }
        let mut inner = self.inner.lock();

        if !inner.sr_enabled && self.config.poll {
            inner.polltick += 1;
            if inner.polltick >= self.config.pollrate() {
                inner.polltick = 0;
                if !self.dpc_triggered.load(Ordering::Acquire) {
                    let devpend = with_host_claimed(dev.func1(), || dev.f0_readb(SDIO_CCCR_INT_PENDING))
                        .unwrap_or(0);
                    if devpend & (regs::INTR_STATUS_FUNC1 | regs::INTR_STATUS_FUNC2) != 0 {
                        inner.cnt.pollcnt += 1;
                        self.ipend.store(true, Ordering::Release);
                        self.trigger_dpc();
                    }
                }
                inner.cnt.lastintrs = self.intrcount.load(Ordering::Relaxed);
            }
        }

        if inner.console_interval_ms != 0 {
            inner.console_tick += self.config.watchdog_ms;
            if inner.console_tick >= inner.console_interval_ms {
                inner.console_tick -= inner.console_interval_ms;
                let res = with_host_claimed(dev.func1(), || {
                    self.bus_sleep(&mut inner, false, false)?;
                    self.readconsole(&mut inner)
                });
                if let Err(e) = res {
                    log::warn!(target: "brcmfmac::fwcon", "console read failed, polling stopped: {}", e);
                    inner.console_interval_ms = 0;
                }
            }
        }

        if self.dpc_triggered.load(Ordering::Acquire) || self.dpc_running.load(Ordering::Acquire) {
            inner.idlecount = 0;
            return true;
        }
        if self.config.idle_time == 0 || inner.clkstate != ClkState::Avail {
            inner.idlecount = 0;
            return true;
        }
        inner.idlecount += 1;
        if inner.idlecount <= self.config.idle_time {
            return true;
        }
        log::debug!(target: "brcmfmac::sdio", "idle");
        inner.idlecount = 0;
        match with_host_claimed(dev.func1(), || self.bus_sleep(&mut inner, true, false)) {
            Ok(()) => false,
            Err(e) => {
                log::debug!(target: "brcmfmac::sdio", "idle sleep skipped: {}", e);
                true
            }
        }
    }

    /// 登记一个需要在挂起时停下的 worker
    pub fn register_worker(&self) -> WorkerGuard<'_> {
        WorkerGuard::new(&self.freezer)
    }

    /// DPC worker 主循环，由平台线程调用；`should_stop` 返回 true 时退出
    pub fn dpc_worker(&self, should_stop: &dyn Fn() -> bool) {
        let _guard = self.register_worker();
        let delay = self.dev().delay();
        while !should_stop() && !self.removed.load(Ordering::Acquire) {
            if self.freezer.try_freeze(delay) {
                continue;
            }
            if self.dpc_triggered.load(Ordering::Acquire) {
                self.run_dpc();
            } else {
                delay.delay_us(DPC_IDLE_US);
            }
        }
    }

    /// 看门狗 worker 主循环
    pub fn watchdog_worker(&self, should_stop: &dyn Fn() -> bool) {
        let _guard = self.register_worker();
        let delay = self.dev().delay();
        while !should_stop() && !self.removed.load(Ordering::Acquire) {
            if self.freezer.try_freeze(delay) {
                continue;
            }
            self.watchdog();
            delay.delay_ms(self.config.watchdog_ms.max(1));
        }
    }
}
