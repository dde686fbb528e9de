//! 芯片识别与背板管理
//!
//! `Chip::attach` 流程：
//! 1. `prepare`：总线侧准备（如 SDIO 请求 ALP 时钟）
//! 2. 读枚举基址处 chipid，按背板类型建立核心表（SB 固定表 / AI 扫描 EROM）
//! 3. 检查 CPU 核与 RAM 核；让 CPU 进入 passive；可选的总线侧 `reset`
//! 4. 测定 RAM 基址与大小
//! 5. 读 chipcommon 能力与 PMU 修订，调用总线侧 `setup`
//!
//! 核心表在 attach 之后只读。

use alloc::vec::Vec;

use bus::{ChipId, Delay, Error, Result, SpinDelay};

use crate::backplane::{Backplane, Core};
use crate::erom::erom_scan;
use crate::regs::{self, armcr4, cc, chip_id, core_id, socram};

/// 背板访问回调，由总线（SDIO/PCIe）实现
pub trait BuscoreOps {
    /// 读背板地址
    fn read32(&self, addr: u32) -> Result<u32>;
    /// 写背板地址
    fn write32(&self, addr: u32, val: u32) -> Result<()>;

    /// 枚举空间基址
    fn enum_base(&self) -> u32 {
        regs::SI_ENUM_BASE_DEFAULT
    }

    /// 读 chipid 之前调用
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// 核心表确定后、测定 RAM 之前调用，用于芯片级复位
    fn reset(&self, _info: &ChipInfo, _cores: &[Core]) -> Result<()> {
        Ok(())
    }

    /// attach 末尾调用
    fn setup(&self, _info: &ChipInfo, _cores: &[Core]) -> Result<()> {
        Ok(())
    }

    /// CPU 释放复位之前调用，`rstvec` 为固件复位向量
    fn activate(&self, _info: &ChipInfo, _rstvec: u32) -> Result<()> {
        Ok(())
    }

    /// 微秒延时
    fn udelay(&self, us: u32) {
        SpinDelay.delay_us(us)
    }
}

/// 芯片信息
#[derive(Debug, Clone, Default)]
pub struct ChipInfo {
    pub chip: u32,
    pub chiprev: u32,
    pub enum_base: u32,
    pub cc_caps: u32,
    pub cc_caps_ext: u32,
    pub pmucaps: u32,
    pub pmurev: u32,
    pub rambase: u32,
    pub ramsize: u32,
    /// 保存/恢复（retention）RAM 大小
    pub srsize: u32,
}

impl ChipInfo {
    pub fn id(&self) -> ChipId {
        ChipId {
            chip: self.chip,
            chiprev: self.chiprev,
        }
    }
}

/// SB 芯片固定核心表
const SB_CORE_TABLES: &[(u32, &[(u16, u32)])] = &[(
    chip_id::BCM4329,
    &[
        (core_id::CHIPCOMMON, 0x1800_0000),
        (core_id::SDIO_DEV, 0x1801_1000),
        (core_id::INTERNAL_MEM, 0x1800_3000),
        (core_id::ARM_CM3, 0x1800_2000),
        (core_id::D11, 0x1800_1000),
    ],
)];

/// CR4/CA7/sysmem 芯片的 RAM 基址
const TCM_RAMBASE: &[(&[u32], u32)] = &[
    (&[chip_id::BCM4345, chip_id::BCM43454, chip_id::BCM43455], 0x19_8000),
    (
        &[
            chip_id::BCM4335,
            chip_id::BCM4339,
            chip_id::BCM4350,
            chip_id::BCM4354,
            chip_id::BCM4356,
            chip_id::BCM43567,
            chip_id::BCM43569,
            chip_id::BCM43570,
            chip_id::BCM4358,
            chip_id::BCM43602,
            chip_id::BCM4371,
        ],
        0x18_0000,
    ),
    (
        &[
            chip_id::BCM43465,
            chip_id::BCM43525,
            chip_id::BCM4365,
            chip_id::BCM4366,
            chip_id::BCM43664,
            chip_id::BCM43666,
        ],
        0x20_0000,
    ),
    (&[chip_id::BCM4364, chip_id::CY4373], 0x16_0000),
    (&[chip_id::CY43752], 0x17_0000),
];

/// 保存/恢复能力的寄存器布局，各芯片族互不相同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SrLayout {
    /// PMU chipcontrol 3 与掩码
    PmuChipControl3 { mask: u32 },
    /// chipcommon sr_control1 非零
    CcSrControl1,
    /// chipcommon sr_control0 使能位
    CcSrControl0,
    /// PMU retention_ctl 未禁用 MAC/PHY 与逻辑
    PmuRetention,
    /// PMU 扩展能力声明支持后再看 retention_ctl
    PmuCapsExt,
}

const SR_LAYOUTS: &[(&[u32], SrLayout)] = &[
    (
        &[chip_id::BCM4354, chip_id::BCM4356, chip_id::BCM4345],
        SrLayout::PmuChipControl3 { mask: 1 << 2 },
    ),
    (
        &[chip_id::BCM43241, chip_id::BCM4335, chip_id::BCM4339],
        SrLayout::PmuChipControl3 { mask: !0 },
    ),
    (&[chip_id::BCM43430, chip_id::CY43439], SrLayout::CcSrControl1),
    (&[chip_id::CY4373], SrLayout::CcSrControl0),
    (
        &[chip_id::BCM4359, chip_id::CY43752, chip_id::CY43012],
        SrLayout::PmuRetention,
    ),
];

fn sr_layout(chip: u32) -> SrLayout {
    SR_LAYOUTS
        .iter()
        .find(|(chips, _)| chips.contains(&chip))
        .map(|&(_, layout)| layout)
        .unwrap_or(SrLayout::PmuCapsExt)
}

/// CPU 核类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuKind {
    Cm3,
    Cr4,
    Ca7,
}

/// 已识别的芯片
pub struct Chip<O> {
    ops: O,
    info: ChipInfo,
    backplane: Backplane,
    cores: Vec<Core>,
}

impl<O: BuscoreOps> Chip<O> {
    /// 识别芯片并建立核心表；失败时不返回半初始化对象
    pub fn attach(ops: O) -> Result<Self> {
        ops.prepare()?;
        let mut chip = Self::recognition(ops)?;
        chip.setup()?;
        log::info!(
            target: "brcmfmac::chip",
            "chip {} ram {:#x} @ {:#x} sr {:#x}",
            chip.info.id(),
            chip.info.ramsize,
            chip.info.rambase,
            chip.info.srsize
        );
        Ok(chip)
    }

    fn recognition(ops: O) -> Result<Self> {
        let enum_base = ops.enum_base();
        let regdata = ops.read32(enum_base + cc::CHIPID)?;
        let chip = regdata & cc::CID_ID_MASK;
        let chiprev = (regdata & cc::CID_REV_MASK) >> cc::CID_REV_SHIFT;
        let socitype = (regdata & cc::CID_TYPE_MASK) >> cc::CID_TYPE_SHIFT;
        log::info!(
            target: "brcmfmac::chip",
            "found {} chip: {}",
            if socitype == regs::SOCI_SB { "SB" } else { "AXI" },
            ChipId { chip, chiprev }
        );

        let (backplane, cores) = match socitype {
            regs::SOCI_SB => {
                let Some(&(_, table)) = SB_CORE_TABLES.iter().find(|(id, _)| *id == chip) else {
                    log::error!(target: "brcmfmac::chip", "SB chip {:#x} is not supported", chip);
                    return Err(Error::WrongType);
                };
                let mut cores = Vec::with_capacity(table.len());
                for &(id, base) in table {
                    let idh = ops.read32(base + regs::sb::SBIDHIGH)?;
                    cores.push(Core {
                        id,
                        rev: regs::sb::corerev(idh),
                        base,
                        wrapbase: 0,
                    });
                }
                (Backplane::Sb, cores)
            }
            regs::SOCI_AI => {
                let erom = ops.read32(enum_base + cc::EROMPTR)?;
                (Backplane::Ai, erom_scan(&ops, erom)?)
            }
            _ => {
                log::error!(target: "brcmfmac::chip", "chip backplane type {} is not supported", socitype);
                return Err(Error::WrongType);
            }
        };

        let mut chip = Chip {
            ops,
            info: ChipInfo {
                chip,
                chiprev,
                enum_base,
                ..ChipInfo::default()
            },
            backplane,
            cores,
        };
        chip.cores_check()?;
        chip.set_passive()?;
        chip.ops.reset(&chip.info, &chip.cores)?;
        chip.set_passive()?;
        chip.get_raminfo()?;
        Ok(chip)
    }

    fn cores_check(&self) -> Result<()> {
        let mut need_socram = false;
        let mut has_socram = false;
        let mut cpu_found = false;
        for (idx, core) in self.cores.iter().enumerate() {
            log::debug!(
                target: "brcmfmac::chip",
                " [{:<2}] core {:#x}:{:<2} base {:#010x} wrap {:#010x}",
                idx + 1, core.id, core.rev, core.base, core.wrapbase
            );
            match core.id {
                core_id::ARM_CM3 => {
                    cpu_found = true;
                    need_socram = true;
                }
                core_id::ARM_CR4 | core_id::ARM_CA7 => cpu_found = true,
                core_id::INTERNAL_MEM => has_socram = true,
                _ => {}
            }
        }
        if !cpu_found {
            log::error!(target: "brcmfmac::chip", "CPU core not detected");
            return Err(Error::IoNotPresent);
        }
        if need_socram && !has_socram {
            log::error!(target: "brcmfmac::chip", "RAM core not provided with ARM CM3 core");
            return Err(Error::WrongType);
        }
        Ok(())
    }

    fn setup(&mut self) -> Result<()> {
        let ccbase = self.chipcommon()?.base;
        self.info.cc_caps = self.ops.read32(ccbase + cc::CAPABILITIES)?;
        self.info.cc_caps_ext = self.ops.read32(ccbase + cc::CAPABILITIES_EXT)?;
        if self.info.cc_caps & cc::CAP_PMU != 0 {
            let pmubase = self.pmu()?.base;
            let val = self.ops.read32(pmubase + cc::PMUCAPABILITIES)?;
            self.info.pmurev = val & cc::PCAP_REV_MASK;
            self.info.pmucaps = val;
        }
        log::debug!(
            target: "brcmfmac::chip",
            "ccrev {} pmurev {} pmucaps {:#x}",
            self.chipcommon()?.rev, self.info.pmurev, self.info.pmucaps
        );
        self.ops.setup(&self.info, &self.cores)
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn info(&self) -> &ChipInfo {
        &self.info
    }

    pub fn id(&self) -> ChipId {
        self.info.id()
    }

    pub fn backplane(&self) -> Backplane {
        self.backplane
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// 按核心 ID 查找（同 ID 多个时取第一个）
    pub fn get_core(&self, id: u16) -> Option<&Core> {
        self.cores.iter().find(|c| c.id == id)
    }

    pub fn chipcommon(&self) -> Result<&Core> {
        self.get_core(core_id::CHIPCOMMON).ok_or(Error::IoNotPresent)
    }

    /// PMU 寄存器所在核心：有独立 PMU 核时用之，否则为 chipcommon
    pub fn pmu(&self) -> Result<&Core> {
        if self.info.cc_caps_ext & cc::CAP_EXT_AOB_PRESENT != 0 {
            if let Some(pmu) = self.get_core(core_id::PMU) {
                return Ok(pmu);
            }
        }
        self.chipcommon()
    }

    pub fn cpu_kind(&self) -> Option<CpuKind> {
        if self.get_core(core_id::ARM_CR4).is_some() {
            Some(CpuKind::Cr4)
        } else if self.get_core(core_id::ARM_CA7).is_some() {
            Some(CpuKind::Ca7)
        } else if self.get_core(core_id::ARM_CM3).is_some() {
            Some(CpuKind::Cm3)
        } else {
            None
        }
    }

    pub fn core_read32(&self, core: &Core, reg: u32) -> Result<u32> {
        self.ops.read32(core.base + reg)
    }

    pub fn core_write32(&self, core: &Core, reg: u32, val: u32) -> Result<()> {
        self.ops.write32(core.base + reg, val)
    }

    pub fn is_core_up(&self, core: &Core) -> Result<bool> {
        self.backplane.is_core_up(&self.ops, core)
    }

    pub fn core_disable(&self, core: &Core, prereset: u32, reset: u32) -> Result<()> {
        self.backplane.core_disable(&self.ops, core, prereset, reset)
    }

    pub fn reset_core(&self, core: &Core, prereset: u32, reset: u32, postreset: u32) -> Result<()> {
        self.backplane
            .reset_core(&self.ops, core, prereset, reset, postreset)
    }

    fn disable_arm(&self, id: u16) -> Result<()> {
        let Some(core) = self.get_core(id) else {
            return Ok(());
        };
        match id {
            core_id::ARM_CM3 => self.core_disable(core, 0, 0),
            _ => {
                let val = self.ops.read32(core.wrapbase + regs::ai::IOCTL)?
                    & regs::ARMCR4_IOCTL_CPUHALT;
                self.reset_core(
                    core,
                    val,
                    regs::ARMCR4_IOCTL_CPUHALT,
                    regs::ARMCR4_IOCTL_CPUHALT,
                )
            }
        }
    }

    fn reset_d11(&self) -> Result<()> {
        if let Some(d11) = self.get_core(core_id::D11) {
            self.reset_core(
                d11,
                regs::D11_IOCTL_PHYRESET | regs::D11_IOCTL_PHYCLOCKEN,
                regs::D11_IOCTL_PHYCLOCKEN,
                regs::D11_IOCTL_PHYCLOCKEN,
            )?;
        }
        Ok(())
    }

    /// 停住 CPU，使 RAM 可被主机写入
    pub fn set_passive(&self) -> Result<()> {
        match self.cpu_kind() {
            Some(CpuKind::Cr4) => {
                self.disable_arm(core_id::ARM_CR4)?;
                self.reset_d11()
            }
            Some(CpuKind::Ca7) => {
                self.disable_arm(core_id::ARM_CA7)?;
                self.reset_d11()
            }
            Some(CpuKind::Cm3) => {
                self.disable_arm(core_id::ARM_CM3)?;
                self.reset_d11()?;
                let sr = self.get_core(core_id::INTERNAL_MEM).ok_or(Error::IoNotPresent)?;
                self.reset_core(sr, 0, 0, 0)?;
                if self.info.chip == chip_id::BCM43430 {
                    // 关闭 bank 3 重映射
                    self.core_write32(sr, socram::BANKIDX, 3)?;
                    self.core_write32(sr, socram::BANKPDA, 0)?;
                }
                Ok(())
            }
            None => Err(Error::IoNotPresent),
        }
    }

    /// 释放 CPU 运行固件
    pub fn set_active(&self, rstvec: u32) -> Result<()> {
        match self.cpu_kind() {
            Some(CpuKind::Cm3) => {
                let sr = self.get_core(core_id::INTERNAL_MEM).ok_or(Error::IoNotPresent)?;
                if !self.is_core_up(sr)? {
                    log::error!(target: "brcmfmac::chip", "SOCRAM core is down after reset");
                    return Err(Error::NotReady);
                }
                self.ops.activate(&self.info, 0)?;
                let arm = self.get_core(core_id::ARM_CM3).ok_or(Error::IoNotPresent)?;
                self.reset_core(arm, 0, 0, 0)
            }
            Some(kind) => {
                let id = if kind == CpuKind::Cr4 {
                    core_id::ARM_CR4
                } else {
                    core_id::ARM_CA7
                };
                self.ops.activate(&self.info, rstvec)?;
                let arm = self.get_core(id).ok_or(Error::IoNotPresent)?;
                self.reset_core(arm, regs::ARMCR4_IOCTL_CPUHALT, 0, 0)
            }
            None => Err(Error::IoNotPresent),
        }
    }

    fn tcm_rambase(&self) -> u32 {
        if self.info.chip == chip_id::BCM4359 {
            return if self.info.chiprev < 9 { 0x18_0000 } else { 0x16_0000 };
        }
        TCM_RAMBASE
            .iter()
            .find(|(chips, _)| chips.contains(&self.info.chip))
            .map(|&(_, base)| base)
            .unwrap_or(0)
    }

    fn tcm_ramsize(&self, core: &Core) -> Result<u32> {
        let corecap = self.core_read32(core, armcr4::CAP)?;
        let nab = corecap & armcr4::TCBANB_MASK;
        let nbb = (corecap & armcr4::TCBBNB_MASK) >> armcr4::TCBBNB_SHIFT;
        let mut memsize = 0;
        for idx in 0..nab + nbb {
            self.core_write32(core, armcr4::BANKIDX, idx)?;
            let info = self.core_read32(core, armcr4::BANKINFO)?;
            memsize += ((info & armcr4::BSZ_MASK) + 1) * armcr4::BSZ_MULT;
        }
        Ok(memsize)
    }

    /// 返回 (bank 大小, 是否 retention bank)
    fn socram_banksize(&self, core: &Core, idx: u32) -> Result<(u32, bool)> {
        let bankidx = (socram::MEMTYPE_RAM << socram::BANKIDX_MEMTYPE_SHIFT) | idx;
        self.core_write32(core, socram::BANKIDX, bankidx)?;
        let info = self.core_read32(core, socram::BANKINFO)?;
        let size = ((info & socram::BANKINFO_SZMASK) + 1) * socram::BANKINFO_SZBASE;
        Ok((size, info & socram::BANKINFO_RETNTRAM != 0))
    }

    fn sysmem_ramsize(&self, core: &Core) -> Result<u32> {
        if !self.is_core_up(core)? {
            self.reset_core(core, 0, 0, 0)?;
        }
        let coreinfo = self.core_read32(core, socram::COREINFO)?;
        let nb = (coreinfo & socram::SRCI_SRNB_MASK) >> socram::SRCI_SRNB_SHIFT;
        let mut memsize = 0;
        for idx in 0..nb {
            memsize += self.socram_banksize(core, idx)?.0;
        }
        Ok(memsize)
    }

    /// 返回 (ramsize, srsize)
    fn socram_ramsize(&self, core: &Core) -> Result<(u32, u32)> {
        if core.rev < 4 {
            log::warn!(target: "brcmfmac::chip", "socram rev {} unsupported", core.rev);
            return Ok((0, 0));
        }
        if !self.is_core_up(core)? {
            self.reset_core(core, 0, 0, 0)?;
        }
        let coreinfo = self.core_read32(core, socram::COREINFO)?;
        let mut ramsize = 0u32;
        let mut srsize = 0u32;
        if core.rev <= 7 || core.rev == 12 {
            let mut nb = (coreinfo & socram::SRCI_SRNB_MASK) >> socram::SRCI_SRNB_SHIFT;
            let banksize = coreinfo & socram::SRCI_SRBSZ_MASK;
            let lss = (coreinfo & socram::SRCI_LSS_MASK) >> socram::SRCI_LSS_SHIFT;
            if lss != 0 {
                nb = nb.saturating_sub(1);
            }
            ramsize = nb * (1 << (banksize + socram::SR_BSZ_BASE));
            if lss != 0 {
                ramsize += 1 << ((lss - 1) + socram::SR_BSZ_BASE);
            }
        } else {
            let mask = if core.rev >= 23 {
                socram::SRCI_SRNB_MASK | socram::SRCI_SRNB_MASK_EXT
            } else {
                socram::SRCI_SRNB_MASK
            };
            let nb = (coreinfo & mask) >> socram::SRCI_SRNB_SHIFT;
            for idx in 0..nb {
                let (size, retention) = self.socram_banksize(core, idx)?;
                ramsize += size;
                if retention {
                    srsize += size;
                }
            }
        }

        // 固定的 retention 大小
        match self.info.chip {
            chip_id::BCM4334 if self.info.chiprev < 2 => srsize = 32 * 1024,
            chip_id::BCM43430 | chip_id::CY43439 => srsize = 64 * 1024,
            _ => {}
        }
        Ok((ramsize, srsize))
    }

    fn get_raminfo(&mut self) -> Result<()> {
        if let Some(&mem) = self.get_core(core_id::ARM_CR4) {
            self.info.ramsize = self.tcm_ramsize(&mem)?;
            self.info.rambase = self.tcm_rambase();
            if self.info.rambase == 0 {
                log::error!(target: "brcmfmac::chip", "RAM base not provided with ARM CR4 core");
                return Err(Error::InvalidArgument);
            }
        } else if let Some(&mem) = self.get_core(core_id::SYS_MEM) {
            self.info.ramsize = self.sysmem_ramsize(&mem)?;
            self.info.rambase = self.tcm_rambase();
            if self.info.rambase == 0 {
                log::error!(target: "brcmfmac::chip", "RAM base not provided with ARM CA7 core");
                return Err(Error::InvalidArgument);
            }
        } else if let Some(&mem) = self.get_core(core_id::INTERNAL_MEM) {
            let (ramsize, srsize) = self.socram_ramsize(&mem)?;
            self.info.ramsize = ramsize;
            self.info.srsize = srsize;
        } else {
            log::error!(target: "brcmfmac::chip", "no memory cores found");
            return Err(Error::NoMemory);
        }

        if self.info.ramsize == 0 {
            log::error!(target: "brcmfmac::chip", "RAM size is undetermined");
            return Err(Error::NoMemory);
        }
        if self.info.ramsize > regs::CHIP_MAX_MEMSIZE {
            log::error!(target: "brcmfmac::chip", "RAM size {:#x} is incorrect", self.info.ramsize);
            return Err(Error::NoMemory);
        }
        Ok(())
    }

    /// 固件是否启用了保存/恢复（按芯片族查寄存器布局）
    pub fn sr_capable(&self) -> Result<bool> {
        if self.info.pmurev < 17 {
            return Ok(false);
        }
        let ccbase = self.chipcommon()?.base;
        let pmubase = self.pmu()?.base;
        let retention_ok = |chip: &Self| -> Result<bool> {
            let reg = chip.ops.read32(pmubase + cc::RETENTION_CTL)?;
            Ok(reg & (cc::PMU_RCTL_MACPHY_DISABLE | cc::PMU_RCTL_LOGIC_DISABLE) == 0)
        };
        match sr_layout(self.info.chip) {
            SrLayout::PmuChipControl3 { mask } => {
                self.ops.write32(pmubase + cc::CHIPCONTROL_ADDR, 3)?;
                let reg = self.ops.read32(pmubase + cc::CHIPCONTROL_DATA)?;
                Ok(reg & mask != 0)
            }
            SrLayout::CcSrControl1 => Ok(self.ops.read32(ccbase + cc::SR_CONTROL1)? != 0),
            SrLayout::CcSrControl0 => {
                Ok(self.ops.read32(ccbase + cc::SR_CONTROL0)? & cc::SR_CTL0_ENABLE != 0)
            }
            SrLayout::PmuRetention => retention_ok(self),
            SrLayout::PmuCapsExt => {
                let reg = self.ops.read32(pmubase + cc::PMUCAPABILITIES_EXT)?;
                if reg & cc::PCAPEXT_SR_SUPPORTED == 0 {
                    return Ok(false);
                }
                retention_ok(self)
            }
        }
    }
}

impl<O> Drop for Chip<O> {
    fn drop(&mut self) {
        log::debug!(target: "brcmfmac::chip", "detach chip {:#x}", self.info.chip);
    }
}
