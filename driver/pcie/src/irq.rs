//! 中断、邮箱数据与 D3 电源状态
//!
//! 中断分两段：快速检查只读 MAILBOXINT，非零时关中断并交给线程；线程段确认中断位，
//! 处理邮箱数据（深睡请求/退出、D3 应答、固件停机），门铃位通知环的消费方，最后重开中断。

use core::sync::atomic::Ordering;

use bus::{Error, Poll, Result};

use crate::bus::PcieBus;
use crate::device::{PcieDevice, PcieState};
use crate::regs::{d2h_mb, h2d_mb, int, pcie2};

/// 等待 D3 应答时的轮询步长
const D3_WAIT_STEP_US: u32 = 1000;

impl<D: PcieDevice> PcieBus<D> {
    /// 中断上下文：有待处理的邮箱中断时关中断并返回 true
    pub fn isr_quick_check(&self) -> bool {
        match self.dev().reg_read32(pcie2::MAILBOXINT) {
            Ok(0) => {
                self.spurious.fetch_add(1, Ordering::Relaxed);
                false
            }
            Ok(_) => {
                self.intrcount.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.dev().intr_disable() {
                    log::warn!(target: "brcmfmac::pcie", "intr disable: {}", e);
                }
                true
            }
            Err(e) => {
                log::warn!(target: "brcmfmac::pcie", "quick check: {}", e);
                false
            }
        }
    }

    /// 线程上下文的完整处理
    pub fn isr_thread(&self) -> Result<()> {
        let dev = self.dev();
        let status = dev.reg_read32(pcie2::MAILBOXINT)?;
        if status != 0 {
            dev.reg_write32(pcie2::MAILBOXINT, status)?;
            if status & int::D2H_MB_DATA != 0 {
                self.handle_mb_data()?;
            }
            if status & int::D2H_DB != 0 && dev.state() == PcieState::Up {
                self.inner.lock().cnt.doorbells += 1;
                self.consumer.rings_ready();
            }
            if status & !int::ENABLED != 0 {
                log::warn!(target: "brcmfmac::pcie", "unexpected interrupt bits {:#x}", status & !int::ENABLED);
            }
        }
        if self.config.console {
            if let Err(e) = self.poll_console() {
                log::debug!(target: "brcmfmac::pcie", "console: {}", e);
            }
        }
        if dev.state() == PcieState::Up {
            dev.intr_enable()?;
        }
        Ok(())
    }

    /// 读取并清除设备 → 主机邮箱数据
    fn handle_mb_data(&self) -> Result<()> {
        let Some(sh) = self.inner.lock().shared else {
            return Ok(());
        };
        let dev = self.dev();
        let data = dev.tcm_read32(sh.dtoh_mb_data_addr)?;
        if data == 0 {
            return Ok(());
        }
        dev.tcm_write32(sh.dtoh_mb_data_addr, 0)?;
        self.inner.lock().cnt.mb_data_rx += 1;
        log::debug!(target: "brcmfmac::pcie", "D2H mailbox data {:#x}", data);

        if data & d2h_mb::DS_ENTER_REQ != 0 {
            log::info!(target: "brcmfmac::pcie", "deep sleep request");
            self.inner.lock().cnt.ds_enter_reqs += 1;
            self.send_mb_data(h2d_mb::DS_ACK)?;
        }
        if data & d2h_mb::DS_EXIT_NOTE != 0 {
            log::info!(target: "brcmfmac::pcie", "deep sleep exit");
        }
        if data & d2h_mb::D3_ACK != 0 {
            log::info!(target: "brcmfmac::pcie", "D3 ack");
            self.inner.lock().cnt.d3_acks += 1;
            self.mbdata_completed.store(true, Ordering::Release);
        }
        if data & d2h_mb::FWHALT != 0 {
            log::error!(target: "brcmfmac::pcie", "firmware halted");
            self.inner.lock().cnt.fw_halts += 1;
            let _ = self.poll_console();
            dev.change_state(PcieState::Down);
        }
        Ok(())
    }

    /// 写一个主机 → 设备邮箱命令：先等上一条被取走，再敲两次门铃
    pub fn send_mb_data(&self, data: u32) -> Result<()> {
        let Some(sh) = self.inner.lock().shared else {
            return Err(Error::NotReady);
        };
        let dev = self.dev();
        let addr = sh.htod_mb_data_addr;
        bus::retry_with_interval(
            dev.delay(),
            self.config.mbdata_retries,
            self.config.mbdata_interval_ms.saturating_mul(1000),
            "mailbox data",
            |_| {
                Ok(if dev.tcm_read32(addr)? == 0 {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                })
            },
        )?;
        dev.tcm_write32(addr, data)?;
        dev.ring_sbmbx()?;
        self.inner.lock().cnt.mb_data_tx += 1;
        log::debug!(target: "brcmfmac::pcie", "H2D mailbox data {:#x}", data);
        Ok(())
    }

    /// 进入 D3：通知固件并等待应答；超时回到 Up
    pub fn suspend(&self) -> Result<()> {
        self.check_up()?;
        let dev = self.dev();
        dev.change_state(PcieState::Down);
        self.mbdata_completed.store(false, Ordering::Release);

        let res = self.send_mb_data(h2d_mb::D3_INFORM).and_then(|_| {
            let retries = self.config.d3_ack_timeout_ms.saturating_mul(1000) / D3_WAIT_STEP_US;
            bus::retry_with_interval(dev.delay(), retries.max(1), D3_WAIT_STEP_US, "D3 ack", |_| {
                if self.mbdata_completed.load(Ordering::Acquire) {
                    return Ok(Poll::Ready(()));
                }
                if self.isr_quick_check() {
                    self.isr_thread()?;
                }
                Ok(Poll::Pending)
            })
        });
        if let Err(e) = res {
            log::error!(target: "brcmfmac::pcie", "enter D3 failed: {}", e);
            if dev.state() == PcieState::Down {
                dev.change_state(PcieState::Up);
                let _ = dev.intr_enable();
            }
            return Err(e);
        }
        log::info!(target: "brcmfmac::pcie", "entered D3");
        Ok(())
    }

    /// 离开 D3；设备在挂起期间掉电时返回 `NotReady`，需要重新 attach
    pub fn resume(&self) -> Result<()> {
        match self.dev().state() {
            PcieState::Up => return Ok(()),
            PcieState::Removed => return Err(Error::Removed),
            PcieState::Down => {}
        }
        let Some(sh) = self.inner.lock().shared else {
            return Err(Error::NotReady);
        };
        let dev = self.dev();
        if dev.reg_read32(pcie2::INTMASK)? == 0 {
            log::warn!(target: "brcmfmac::pcie", "device lost power in D3");
            return Err(Error::NotReady);
        }
        self.send_mb_data(h2d_mb::D0_INFORM)?;
        self.hostready(&sh)?;
        dev.change_state(PcieState::Up);
        dev.intr_enable()?;
        log::info!(target: "brcmfmac::pcie", "left D3");
        Ok(())
    }
}
