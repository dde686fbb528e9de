//! 背板寄存器与核心 ID 常量

/// 默认枚举空间基址：chipcommon 位于此处
pub const SI_ENUM_BASE_DEFAULT: u32 = 0x1800_0000;

/// 核心 ID
pub mod core_id {
    pub const CHIPCOMMON: u16 = 0x800;
    pub const INTERNAL_MEM: u16 = 0x80E;
    pub const D11: u16 = 0x812;
    pub const ARM_7S: u16 = 0x825;
    pub const PMU: u16 = 0x827;
    pub const SDIO_DEV: u16 = 0x829;
    pub const ARM_CM3: u16 = 0x82A;
    pub const PCIE2: u16 = 0x83C;
    pub const ARM_CR4: u16 = 0x83E;
    pub const GCI: u16 = 0x840;
    pub const ARM_CA7: u16 = 0x847;
    pub const SYS_MEM: u16 = 0x849;
}

/// 芯片 ID
pub mod chip_id {
    pub const BCM43143: u32 = 43143;
    pub const BCM43241: u32 = 0x4324;
    pub const BCM4329: u32 = 0x4329;
    pub const BCM4330: u32 = 0x4330;
    pub const BCM4334: u32 = 0x4334;
    pub const BCM43340: u32 = 43340;
    pub const BCM43341: u32 = 43341;
    pub const BCM43362: u32 = 43362;
    pub const BCM4335: u32 = 0x4335;
    pub const BCM4339: u32 = 0x4339;
    pub const BCM43430: u32 = 43430;
    pub const BCM4345: u32 = 0x4345;
    pub const BCM43454: u32 = 43454;
    pub const BCM43455: u32 = 43455;
    pub const BCM4350: u32 = 0x4350;
    pub const BCM4354: u32 = 0x4354;
    pub const BCM4356: u32 = 0x4356;
    pub const BCM43567: u32 = 43567;
    pub const BCM43569: u32 = 43569;
    pub const BCM43570: u32 = 43570;
    pub const BCM4358: u32 = 0x4358;
    pub const BCM4359: u32 = 0x4359;
    pub const BCM43602: u32 = 43602;
    pub const BCM4364: u32 = 0x4364;
    pub const BCM4365: u32 = 0x4365;
    pub const BCM4366: u32 = 0x4366;
    pub const BCM43664: u32 = 43664;
    pub const BCM43666: u32 = 43666;
    pub const BCM4371: u32 = 0x4371;
    pub const BCM43465: u32 = 43465;
    pub const BCM43525: u32 = 43525;
    pub const CY4373: u32 = 0x4373;
    pub const CY43012: u32 = 43012;
    pub const CY43439: u32 = 43439;
    pub const CY43752: u32 = 43752;
}

/// chipcommon 寄存器偏移
pub mod cc {
    pub const CHIPID: u32 = 0x00;
    pub const CAPABILITIES: u32 = 0x04;
    pub const WATCHDOG: u32 = 0x80;
    pub const CAPABILITIES_EXT: u32 = 0xAC;
    pub const EROMPTR: u32 = 0xFC;
    pub const SR_CONTROL0: u32 = 0x504;
    pub const SR_CONTROL1: u32 = 0x508;
    pub const PMUCONTROL: u32 = 0x600;
    pub const PMUCAPABILITIES: u32 = 0x604;
    pub const PMUSTATUS: u32 = 0x608;
    pub const PMUCAPABILITIES_EXT: u32 = 0x64C;
    pub const CHIPCONTROL_ADDR: u32 = 0x650;
    pub const CHIPCONTROL_DATA: u32 = 0x654;
    pub const RETENTION_CTL: u32 = 0x670;

    pub const CID_ID_MASK: u32 = 0x0000_FFFF;
    pub const CID_REV_MASK: u32 = 0x000F_0000;
    pub const CID_REV_SHIFT: u32 = 16;
    pub const CID_TYPE_MASK: u32 = 0xF000_0000;
    pub const CID_TYPE_SHIFT: u32 = 28;

    pub const CAP_PMU: u32 = 0x1000_0000;
    pub const CAP_EXT_AOB_PRESENT: u32 = 0x40;
    pub const PCAP_REV_MASK: u32 = 0xFF;
    pub const PCAPEXT_SR_SUPPORTED: u32 = 1 << 1;
    pub const SR_CTL0_ENABLE: u32 = 1 << 0;
    pub const PMU_RCTL_MACPHY_DISABLE: u32 = 1 << 26;
    pub const PMU_RCTL_LOGIC_DISABLE: u32 = 1 << 27;
}

/// 背板类型（chipid 寄存器 [31:28]）
pub const SOCI_SB: u32 = 0;
pub const SOCI_AI: u32 = 1;

/// 简单总线（SB）核心寄存器，相对核心基址
pub mod sb {
    pub const SBIMSTATE: u32 = 0xF90;
    pub const SBTMSTATELOW: u32 = 0xF98;
    pub const SBTMSTATEHIGH: u32 = 0xF9C;
    pub const SBIDLOW: u32 = 0xFF8;
    pub const SBIDHIGH: u32 = 0xFFC;

    pub const TMSLOW_RESET: u32 = 0x0000_0001;
    pub const TMSLOW_REJECT: u32 = 0x0000_0002;
    pub const TMSLOW_CLOCK: u32 = 0x0001_0000;
    pub const TMSLOW_FGC: u32 = 0x0002_0000;
    pub const TMSHIGH_SERR: u32 = 0x0000_0001;
    pub const TMSHIGH_BUSY: u32 = 0x0000_0004;
    pub const IMSTATE_IBE: u32 = 0x0002_0000;
    pub const IMSTATE_TO: u32 = 0x0004_0000;
    pub const IMSTATE_BUSY: u32 = 0x0180_0000;
    pub const IMSTATE_REJECT: u32 = 0x0200_0000;
    pub const IDLOW_INITIATOR: u32 = 0x80;

    /// SBIDHIGH 中的核心修订号
    #[inline]
    pub const fn corerev(idh: u32) -> u8 {
        ((idh & 0xF) | ((idh & 0x7000) >> 8)) as u8
    }
}

/// 动态协议（AI）背板 wrapper 寄存器，相对 wrapper 基址
pub mod ai {
    pub const IOCTL: u32 = 0x408;
    pub const IOST: u32 = 0x500;
    pub const RESET_CTL: u32 = 0x800;
    pub const RESET_ST: u32 = 0x804;

    pub const IOCTL_CLK: u32 = 0x0001;
    pub const IOCTL_FGC: u32 = 0x0002;
    pub const RESET_CTL_RESET: u32 = 0x0001;
}

/// D11 核心 IOCTL 位
pub const D11_IOCTL_PHYCLOCKEN: u32 = 0x0004;
pub const D11_IOCTL_PHYRESET: u32 = 0x0008;

/// ARM CR4/CA7 IOCTL：CPU 停机
pub const ARMCR4_IOCTL_CPUHALT: u32 = 0x0020;

/// ARM CR4 TCM 寄存器
pub mod armcr4 {
    pub const CAP: u32 = 0x04;
    pub const BANKIDX: u32 = 0x40;
    pub const BANKINFO: u32 = 0x44;
    pub const BANKPDA: u32 = 0x4C;

    pub const TCBANB_MASK: u32 = 0xF;
    pub const TCBBNB_MASK: u32 = 0xF0;
    pub const TCBBNB_SHIFT: u32 = 4;
    pub const BSZ_MASK: u32 = 0x7F;
    pub const BSZ_MULT: u32 = 8192;
}

/// socram / sysmem 寄存器
pub mod socram {
    pub const COREINFO: u32 = 0x00;
    pub const BANKIDX: u32 = 0x10;
    pub const BANKINFO: u32 = 0x40;
    pub const BANKPDA: u32 = 0x44;

    pub const SRCI_SRNB_MASK: u32 = 0xF0;
    pub const SRCI_SRNB_MASK_EXT: u32 = 0x100;
    pub const SRCI_SRNB_SHIFT: u32 = 4;
    pub const SRCI_SRBSZ_MASK: u32 = 0xF;
    pub const SRCI_LSS_MASK: u32 = 0x00F0_0000;
    pub const SRCI_LSS_SHIFT: u32 = 20;
    pub const SR_BSZ_BASE: u32 = 14;

    pub const MEMTYPE_RAM: u32 = 0;
    pub const BANKIDX_MEMTYPE_SHIFT: u32 = 8;
    pub const BANKINFO_SZMASK: u32 = 0x7F;
    pub const BANKINFO_SZBASE: u32 = 8192;
    pub const BANKINFO_RETNTRAM: u32 = 0x0001_0000;
}

/// 设备 RAM 大小上限
pub const CHIP_MAX_MEMSIZE: u32 = 4 * 1024 * 1024;
