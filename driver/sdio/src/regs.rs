//! SDIO 设备寄存器

/// Function 1 寄存器（F1 地址空间 0x10000 以上）
pub mod f1 {
    pub const WATERMARK: u32 = 0x10008;
    pub const DEVICE_CTL: u32 = 0x10009;
    pub const SBADDRLOW: u32 = 0x1000A;
    pub const SBADDRMID: u32 = 0x1000B;
    pub const SBADDRHIGH: u32 = 0x1000C;
    pub const FRAMECTRL: u32 = 0x1000D;
    pub const CHIPCLKCSR: u32 = 0x1000E;
    pub const SDIOPULLUP: u32 = 0x1000F;
    pub const WFRAMEBCLO: u32 = 0x10019;
    pub const WFRAMEBCHI: u32 = 0x1001A;
    pub const RFRAMEBCLO: u32 = 0x1001B;
    pub const RFRAMEBCHI: u32 = 0x1001C;
    pub const MESBUSYCTRL: u32 = 0x1001D;
    pub const WAKEUPCTRL: u32 = 0x1001E;
    pub const SLEEPCSR: u32 = 0x1001F;
}

/// DEVICE_CTL：只允许时钟可用中断
pub const DEVCTL_CA_INT_ONLY: u8 = 0x04;

/// FRAMECTRL
pub const SFC_RF_TERM: u8 = 1 << 0;
pub const SFC_WF_TERM: u8 = 1 << 1;

/// CHIPCLKCSR
pub const FORCE_ALP: u8 = 0x01;
pub const FORCE_HT: u8 = 0x02;
pub const ALP_AVAIL_REQ: u8 = 0x08;
pub const HT_AVAIL_REQ: u8 = 0x10;
pub const FORCE_HW_CLKREQ_OFF: u8 = 0x20;
pub const ALP_AVAIL: u8 = 0x40;
pub const HT_AVAIL: u8 = 0x80;
pub const AVBITS: u8 = HT_AVAIL | ALP_AVAIL;
/// 请求/强制位
pub const CSR_MASK: u8 = 0x1F;

#[inline]
pub const fn alp_avail(clkcsr: u8) -> bool {
    clkcsr & ALP_AVAIL != 0
}

#[inline]
pub const fn ht_avail(clkcsr: u8) -> bool {
    clkcsr & HT_AVAIL != 0
}

/// SLEEPCSR
pub const SLEEPCSR_KSO_MASK: u8 = 0x01;
pub const SLEEPCSR_DEVON_MASK: u8 = 0x02;

/// WAKEUPCTRL 位
pub const WCTRL_ALPWAIT_SHIFT: u8 = 0;
pub const WCTRL_HTWAIT_SHIFT: u8 = 1;

/// WATERMARK：F2 接收水位
pub const WATERMARK_DEFAULT: u8 = 8;

/// F0 CARDCAP：43012 需要额外的 CMD 不解码位
pub const CARDCAP_CMD_NODEC: u8 = 0x08;

/// 背板窗口
pub const SB_OFT_ADDR_MASK: u32 = 0x07FFF;
pub const SB_OFT_ADDR_LIMIT: u32 = 0x08000;
pub const SB_ACCESS_2_4B_FLAG: u32 = 0x08000;
pub const SBWINDOW_MASK: u32 = 0xFFFF_8000;

/// SDIO 设备核寄存器，相对核心基址
pub mod core {
    pub const INTSTATUS: u32 = 0x20;
    pub const HOSTINTMASK: u32 = 0x24;
    pub const TOSBMAILBOX: u32 = 0x40;
    pub const TOHOSTMAILBOX: u32 = 0x44;
    pub const TOSBMAILBOXDATA: u32 = 0x48;
    pub const TOHOSTMAILBOXDATA: u32 = 0x4C;
}

/// intstatus 位
pub mod int {
    pub const HMB_FC_STATE: u32 = 1 << 4;
    pub const HMB_FC_CHANGE: u32 = 1 << 5;
    pub const HMB_FRAME_IND: u32 = 1 << 6;
    pub const HMB_HOST_INT: u32 = 1 << 7;
    pub const HMB_SW_MASK: u32 = 0x0000_00F0;
    pub const WR_OOSYNC: u32 = 1 << 8;
    pub const RD_OOSYNC: u32 = 1 << 9;
    pub const SBINT: u32 = 1 << 28;
    pub const CHIPACTIVE: u32 = 1 << 29;

    /// 主机关心的中断
    pub const HOSTINTMASK: u32 = HMB_SW_MASK | CHIPACTIVE;
}

/// tosbmailbox 位
pub const SMB_NAK: u32 = 1 << 0;
pub const SMB_INT_ACK: u32 = 1 << 1;
pub const SMB_DATA_VERSION_SHIFT: u32 = 16;

/// tohostmailboxdata 位
pub mod hmb {
    pub const NAKHANDLED: u32 = 0x0001;
    pub const DEVREADY: u32 = 0x0002;
    pub const FC: u32 = 0x0004;
    pub const FWREADY: u32 = 0x0008;
    pub const FWHALT: u32 = 0x0010;
    pub const FCDATA_MASK: u32 = 0xFF00_0000;
    pub const FCDATA_SHIFT: u32 = 24;
    pub const VERSION_MASK: u32 = 0x00FF_0000;
    pub const VERSION_SHIFT: u32 = 16;

    pub const KNOWN: u32 =
        NAKHANDLED | DEVREADY | FC | FWREADY | FWHALT | FCDATA_MASK | VERSION_MASK;
}

/// 协议版本
pub const SDPCM_PROT_VERSION: u32 = 4;

/// F0 INT_PENDING 中 F1/F2 位
pub const INTR_STATUS_FUNC1: u8 = 0x2;
pub const INTR_STATUS_FUNC2: u8 = 0x4;

/// PMU 资源重载位（pmucontrol）
pub const PMU_CTL_RES_RELOAD: u32 = 0x2 << 13;

/// 时钟切换最长等待（微秒）
pub const PMU_MAX_TRANSITION_DLY: u32 = 15000;
