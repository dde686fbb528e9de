//! 核心状态查询与禁用/复位握手
//!
//! 两种背板各一套：
//! - **SB**：通过核心自身的 SBTMSTATELOW/HIGH 置 reject、等 busy 清零、置 reset+时钟
//! - **AI**：通过 wrapper 的 IOCTL/RESET_CTL；已处于复位的核心直接跳到复位态配置
//!
//! 顺序约束：禁用先于复位，复位先于重新激活；`reset_core` 总是先调用 `core_disable`。

use bus::Result;

use crate::regs::{ai, sb};
use crate::BuscoreOps;

/// 背板上的一个核心
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Core {
    pub id: u16,
    pub rev: u8,
    /// 寄存器基址
    pub base: u32,
    /// wrapper 基址（仅 AI 背板）
    pub wrapbase: u32,
}

/// SB busy 等待上限（微秒）
const SB_BUSY_WAIT_US: u32 = 100_000;
/// AI 进入复位等待上限（微秒）
const AI_RESET_WAIT_US: u32 = 300;
/// AI 退出复位的最大尝试次数
const AI_RESET_CLEAR_RETRIES: u32 = 50;

/// 背板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backplane {
    /// 简单总线，核心表固定
    Sb,
    /// 动态协议，核心表来自 EROM
    Ai,
}

/// 以 `step_us` 为步长轮询 `cond` 至多 `limit_us`，返回最终是否满足
fn spin_until<O: BuscoreOps + ?Sized>(
    ops: &O,
    limit_us: u32,
    step_us: u32,
    mut cond: impl FnMut() -> Result<bool>,
) -> Result<bool> {
    let mut waited = 0;
    loop {
        if cond()? {
            return Ok(true);
        }
        if waited >= limit_us {
            return Ok(false);
        }
        ops.udelay(step_us);
        waited += step_us;
    }
}

impl Backplane {
    pub fn is_core_up<O: BuscoreOps + ?Sized>(self, ops: &O, core: &Core) -> Result<bool> {
        match self {
            Backplane::Sb => {
                let val = ops.read32(core.base + sb::SBTMSTATELOW)?;
                let mask = sb::TMSLOW_RESET | sb::TMSLOW_REJECT | sb::TMSLOW_CLOCK;
                Ok(val & mask == sb::TMSLOW_CLOCK)
            }
            Backplane::Ai => {
                let ioctl = ops.read32(core.wrapbase + ai::IOCTL)?;
                if ioctl & (ai::IOCTL_FGC | ai::IOCTL_CLK) != ai::IOCTL_CLK {
                    return Ok(false);
                }
                let rst = ops.read32(core.wrapbase + ai::RESET_CTL)?;
                Ok(rst & ai::RESET_CTL_RESET == 0)
            }
        }
    }

    /// 禁用核心：SB 上 `prereset`/`reset` 不使用
    pub fn core_disable<O: BuscoreOps + ?Sized>(
        self,
        ops: &O,
        core: &Core,
        prereset: u32,
        reset: u32,
    ) -> Result<()> {
        match self {
            Backplane::Sb => sb_core_disable(ops, core),
            Backplane::Ai => ai_core_disable(ops, core, prereset, reset),
        }
    }

    /// 复位核心：先禁用，再解除复位并保持时钟
    pub fn reset_core<O: BuscoreOps + ?Sized>(
        self,
        ops: &O,
        core: &Core,
        prereset: u32,
        reset: u32,
        postreset: u32,
    ) -> Result<()> {
        match self {
            Backplane::Sb => sb_reset_core(ops, core),
            Backplane::Ai => ai_reset_core(ops, core, prereset, reset, postreset),
        }
    }
}

fn sb_core_disable<O: BuscoreOps + ?Sized>(ops: &O, core: &Core) -> Result<()> {
    let low = core.base + sb::SBTMSTATELOW;
    let val = ops.read32(low)?;
    if val & sb::TMSLOW_RESET != 0 {
        return Ok(());
    }

    if val & sb::TMSLOW_CLOCK != 0 {
        ops.write32(low, val | sb::TMSLOW_REJECT)?;
        ops.read32(low)?;
        ops.udelay(1);
        let idle = spin_until(ops, SB_BUSY_WAIT_US, 10, || {
            Ok(ops.read32(core.base + sb::SBTMSTATEHIGH)? & sb::TMSHIGH_BUSY == 0)
        })?;
        if !idle {
            log::warn!(target: "brcmfmac::chip", "core {:#x} state still busy", core.id);
        }

        let initiator = ops.read32(core.base + sb::SBIDLOW)? & sb::IDLOW_INITIATOR != 0;
        let imstate = core.base + sb::SBIMSTATE;
        if initiator {
            let v = ops.read32(imstate)?;
            ops.write32(imstate, v | sb::IMSTATE_REJECT)?;
            ops.udelay(1);
            let idle = spin_until(ops, SB_BUSY_WAIT_US, 10, || {
                Ok(ops.read32(imstate)? & sb::IMSTATE_BUSY == 0)
            })?;
            if !idle {
                log::warn!(target: "brcmfmac::chip", "core {:#x} initiator still busy", core.id);
            }
        }

        ops.write32(
            low,
            sb::TMSLOW_FGC | sb::TMSLOW_CLOCK | sb::TMSLOW_REJECT | sb::TMSLOW_RESET,
        )?;
        ops.read32(low)?;
        ops.udelay(10);

        if initiator {
            let v = ops.read32(imstate)?;
            ops.write32(imstate, v & !sb::IMSTATE_REJECT)?;
        }
    }

    ops.write32(low, sb::TMSLOW_REJECT | sb::TMSLOW_RESET)?;
    ops.udelay(1);
    Ok(())
}

fn sb_reset_core<O: BuscoreOps + ?Sized>(ops: &O, core: &Core) -> Result<()> {
    sb_core_disable(ops, core)?;

    let low = core.base + sb::SBTMSTATELOW;
    ops.write32(low, sb::TMSLOW_FGC | sb::TMSLOW_CLOCK | sb::TMSLOW_RESET)?;
    ops.read32(low)?;
    ops.udelay(1);

    let high = core.base + sb::SBTMSTATEHIGH;
    if ops.read32(high)? & sb::TMSHIGH_SERR != 0 {
        ops.write32(high, 0)?;
    }
    let imstate = core.base + sb::SBIMSTATE;
    let v = ops.read32(imstate)?;
    if v & (sb::IMSTATE_IBE | sb::IMSTATE_TO) != 0 {
        ops.write32(imstate, v & !(sb::IMSTATE_IBE | sb::IMSTATE_TO))?;
    }

    ops.write32(low, sb::TMSLOW_FGC | sb::TMSLOW_CLOCK)?;
    ops.read32(low)?;
    ops.udelay(1);

    ops.write32(low, sb::TMSLOW_CLOCK)?;
    ops.read32(low)?;
    ops.udelay(1);
    Ok(())
}

fn ai_core_disable<O: BuscoreOps + ?Sized>(
    ops: &O,
    core: &Core,
    prereset: u32,
    reset: u32,
) -> Result<()> {
    let ioctl = core.wrapbase + ai::IOCTL;
    let rstctl = core.wrapbase + ai::RESET_CTL;

    if ops.read32(rstctl)? & ai::RESET_CTL_RESET == 0 {
        ops.write32(ioctl, prereset | ai::IOCTL_FGC | ai::IOCTL_CLK)?;
        ops.read32(ioctl)?;

        ops.write32(rstctl, ai::RESET_CTL_RESET)?;
        ops.udelay(10);
        let in_reset = spin_until(ops, AI_RESET_WAIT_US, 10, || {
            Ok(ops.read32(rstctl)? == ai::RESET_CTL_RESET)
        })?;
        if !in_reset {
            log::warn!(target: "brcmfmac::chip", "core {:#x} did not enter reset", core.id);
        }
    }

    ops.write32(ioctl, reset | ai::IOCTL_FGC | ai::IOCTL_CLK)?;
    ops.read32(ioctl)?;
    Ok(())
}

fn ai_reset_core<O: BuscoreOps + ?Sized>(
    ops: &O,
    core: &Core,
    prereset: u32,
    reset: u32,
    postreset: u32,
) -> Result<()> {
    ai_core_disable(ops, core, prereset, reset)?;

    let rstctl = core.wrapbase + ai::RESET_CTL;
    let mut count = 0;
    while ops.read32(rstctl)? & ai::RESET_CTL_RESET != 0 {
        ops.write32(rstctl, 0)?;
        count += 1;
        if count > AI_RESET_CLEAR_RETRIES {
            log::warn!(target: "brcmfmac::chip", "core {:#x} stuck in reset", core.id);
            break;
        }
        ops.udelay(40);
    }

    let ioctl = core.wrapbase + ai::IOCTL;
    ops.write32(ioctl, postreset | ai::IOCTL_CLK)?;
    ops.read32(ioctl)?;
    Ok(())
}
