//! 时钟与睡眠
//!
//! 状态机：`None` ⇄ `SdOnly` ⇄ `Pending` → `Avail`。HT 请求发出后未立即可用时，
//! 允许挂起（pendok）则打开 CA_INT_ONLY 等待时钟可用中断，否则就地轮询。
//!
//! 保存/恢复（SR）模式下芯片自行管理时钟，主机只通过 KSO 控制唤醒。

use bus::{retry_with_interval, Error, Poll, Result};
use chip::regs::chip_id;
use mmc::brcm_f0_reg::{CARDCAP_CMD14_EXT, CARDCAP_CMD14_SUPPORT, SDIO_CCCR_BRCM_CARDCAP};
use mmc::SdioFunc;

use crate::bus::{SdioBus, SdioInner};
use crate::regs::{self, f1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkState {
    /// 连 SD 时钟都不保证
    None,
    SdOnly,
    /// 已请求 HT，等待时钟可用中断
    Pending,
    Avail,
}

const KSO_WAIT_US: u32 = 50;
const KSO_ATTEMPTS: u32 = regs::PMU_MAX_TRANSITION_DLY / KSO_WAIT_US;
/// KSO 轮询期间连续访问错误上限
const MAX_ACCESS_ERRORS: u32 = 5;
const HT_WAIT_STEP_US: u32 = 1000;

impl<F: SdioFunc> SdioBus<F> {
    fn set_ca_int_only(&self, on: bool) -> Result<()> {
        let dev = self.dev();
        let devctl = dev.readb(f1::DEVICE_CTL)?;
        let devctl = if on {
            devctl | regs::DEVCTL_CA_INT_ONLY
        } else {
            devctl & !regs::DEVCTL_CA_INT_ONLY
        };
        dev.writeb(f1::DEVICE_CTL, devctl)
    }

    fn htclk(&self, inner: &mut SdioInner, on: bool, pendok: bool) -> Result<()> {
        if inner.sr_enabled {
            inner.clkstate = if on { ClkState::Avail } else { ClkState::SdOnly };
            return Ok(());
        }
        let dev = self.dev();

        if !on {
            if inner.clkstate == ClkState::Pending {
                self.set_ca_int_only(false)?;
            }
            inner.clkstate = ClkState::SdOnly;
            dev.writeb(f1::CHIPCLKCSR, 0)?;
            log::trace!(target: "brcmfmac::sdio", "HT clock off");
            return Ok(());
        }

        let alp_only = inner.alp_only;
        let avail = |csr: u8| {
            if alp_only {
                regs::alp_avail(csr)
            } else {
                regs::ht_avail(csr)
            }
        };
        let req = if alp_only {
            regs::ALP_AVAIL_REQ
        } else {
            regs::HT_AVAIL_REQ
        };
        dev.writeb(f1::CHIPCLKCSR, req).inspect_err(|e| {
            log::error!(target: "brcmfmac::sdio", "HT avail request failed: {}", e);
        })?;
        let clkctl = dev.readb(f1::CHIPCLKCSR)?;

        if !avail(clkctl) && pendok {
            self.set_ca_int_only(true)?;
            inner.clkstate = ClkState::Pending;
            log::trace!(target: "brcmfmac::sdio", "clock pending, CLKCSR {:#04x}", clkctl);
            return Ok(());
        }
        if inner.clkstate == ClkState::Pending {
            self.set_ca_int_only(false)?;
        }
        if !avail(clkctl) {
            retry_with_interval(
                dev.delay(),
                regs::PMU_MAX_TRANSITION_DLY / HT_WAIT_STEP_US,
                HT_WAIT_STEP_US,
                "HT clock",
                |_| {
                    let csr = dev.readb(f1::CHIPCLKCSR)?;
                    Ok(if avail(csr) { Poll::Ready(()) } else { Poll::Pending })
                },
            )
            .inspect_err(|e| log::error!(target: "brcmfmac::sdio", "HT avail: {}", e))?;
        }
        inner.clkstate = ClkState::Avail;
        log::trace!(target: "brcmfmac::sdio", "clock available");
        Ok(())
    }

    fn sdclk(&self, inner: &mut SdioInner, on: bool) {
        inner.clkstate = if on { ClkState::SdOnly } else { ClkState::None };
    }

    /// 切换到目标时钟状态
    pub(crate) fn clkctl(&self, inner: &mut SdioInner, target: ClkState, pendok: bool) -> Result<()> {
        if inner.clkstate == target {
            if target == ClkState::Avail {
                inner.activity = true;
            }
            return Ok(());
        }
        match target {
            ClkState::Avail => {
                if inner.clkstate == ClkState::None {
                    self.sdclk(inner, true);
                }
                self.htclk(inner, true, pendok)?;
                inner.activity = true;
            }
            ClkState::SdOnly => match inner.clkstate {
                ClkState::None => self.sdclk(inner, true),
                ClkState::Avail => self.htclk(inner, false, false)?,
                cur => log::error!(target: "brcmfmac::sdio", "request for {:?} -> {:?}", cur, target),
            },
            ClkState::None => {
                if inner.clkstate == ClkState::Avail {
                    self.htclk(inner, false, false)?;
                }
                self.sdclk(inner, false);
            }
            ClkState::Pending => return Err(Error::InvalidArgument),
        }
        Ok(())
    }

    /// Keep-SDIO-On：打开时等 KSO 与 DEVON 同时置位，关闭时只看 KSO
    fn kso_control(&self, on: bool) -> Result<()> {
        let dev = self.dev();
        let wr = if on { regs::SLEEPCSR_KSO_MASK } else { 0 };
        // 设备睡着时第一次写会失败
        let _ = dev.writeb(f1::SLEEPCSR, wr);

        // 43012 睡眠后不可回读
        if !on && self.chip.id().chip == chip_id::CY43012 {
            return Ok(());
        }
        let (cmp, bmask) = if on {
            dev.delay().delay_ms(2);
            let m = regs::SLEEPCSR_KSO_MASK | regs::SLEEPCSR_DEVON_MASK;
            (m, m)
        } else {
            (0, regs::SLEEPCSR_KSO_MASK)
        };

        let mut err_cnt = 0;
        retry_with_interval(dev.delay(), KSO_ATTEMPTS, KSO_WAIT_US, "KSO", |attempt| {
            if attempt > 0 {
                let _ = dev.writeb(f1::SLEEPCSR, wr);
            }
            match dev.readb(f1::SLEEPCSR) {
                Ok(v) => {
                    err_cnt = 0;
                    Ok(if v & bmask == cmp { Poll::Ready(()) } else { Poll::Pending })
                }
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    err_cnt += 1;
                    if err_cnt > MAX_ACCESS_ERRORS {
                        Err(e)
                    } else {
                        Ok(Poll::Pending)
                    }
                }
            }
        })
        .inspect_err(|e| log::error!(target: "brcmfmac::sdio", "KSO {}: {}", on, e))
    }

    /// 总线睡眠/唤醒
    pub(crate) fn bus_sleep(&self, inner: &mut SdioInner, sleep: bool, pendok: bool) -> Result<()> {
        if inner.sleeping == sleep {
            return Ok(());
        }
        log::debug!(target: "brcmfmac::sdio", "bus sleep {} (clock {:?})", sleep, inner.clkstate);
        let dev = self.dev();

        if sleep {
            if self.intstatus.load(core::sync::atomic::Ordering::Acquire) != 0
                || self.ipend.load(core::sync::atomic::Ordering::Acquire)
                || self.ctrl_frame_stat.load(core::sync::atomic::Ordering::Acquire)
                || !inner.txq.is_empty()
            {
                return Err(Error::Busy);
            }
            if inner.sr_enabled {
                let csr = dev.readb(f1::CHIPCLKCSR)?;
                if csr & regs::CSR_MASK == 0 {
                    dev.writeb(f1::CHIPCLKCSR, regs::ALP_AVAIL_REQ)?;
                }
                self.kso_control(false)?;
            } else {
                self.clkctl(inner, ClkState::None, pendok)?;
            }
        } else {
            if inner.sr_enabled {
                self.kso_control(true)?;
            }
            self.clkctl(inner, ClkState::Avail, pendok)?;
            inner.idlecount = 0;
        }
        inner.sleeping = sleep;
        Ok(())
    }

    /// 新核（rev ≥ 12）上电后 KSO 可能为 0
    pub(crate) fn kso_init(&self) -> Result<()> {
        if self.sdio_core_rev() < 12 {
            return Ok(());
        }
        let dev = self.dev();
        let val = dev.readb(f1::SLEEPCSR)?;
        if val & regs::SLEEPCSR_KSO_MASK == 0 {
            dev.writeb(f1::SLEEPCSR, val | regs::SLEEPCSR_KSO_MASK)?;
        }
        Ok(())
    }

    /// 打开保存/恢复
    pub(crate) fn sr_init(&self, inner: &mut SdioInner) -> Result<()> {
        let dev = self.dev();
        let ulp = self.chip.id().chip == chip_id::CY43012;
        let shift = if ulp {
            regs::WCTRL_ALPWAIT_SHIFT
        } else {
            regs::WCTRL_HTWAIT_SHIFT
        };
        let wakeupctrl = dev.readb(f1::WAKEUPCTRL)?;
        dev.writeb(f1::WAKEUPCTRL, wakeupctrl | (1 << shift))?;

        let mut cardcap = CARDCAP_CMD14_SUPPORT | CARDCAP_CMD14_EXT;
        if ulp {
            cardcap |= regs::CARDCAP_CMD_NODEC;
        }
        dev.f0_writeb(SDIO_CCCR_BRCM_CARDCAP, cardcap)?;
        dev.writeb(f1::CHIPCLKCSR, regs::FORCE_HT)?;

        inner.sr_enabled = true;
        log::info!(target: "brcmfmac::sdio", "save/restore enabled");
        Ok(())
    }
}
