//! PCIe 配置空间、PCIE2 核心寄存器与共享结构布局

/// PCI 厂商 id
pub const PCI_VENDOR_BROADCOM: u16 = 0x14E4;

/// 支持的 PCI 设备 id
pub const PCIE_DEVICE_IDS: &[u16] = &[
    0x43A3, // 4350 2G/5G
    0x43A0, // 4350
    0x43EC, // 4356
    0x43E3, // 4358 (43569)
    0x43D9, // 43570
    0x43BA, // 43602 2G/5G
    0x43BB, // 43602 2G
    0x43BC, // 43602 5G
    0x4464, // 4364
    0x43CA, // 4365
    0x43C3, // 4366
    0x440D, // 4371
    0x4425, // 4359
];

#[inline]
pub fn pcie_id_match(vendor: u16, device: u16) -> bool {
    vendor == PCI_VENDOR_BROADCOM && PCIE_DEVICE_IDS.contains(&device)
}

/// 配置空间寄存器
pub mod cfg {
    /// BAR0 窗口选择
    pub const BAR0_WINDOW: u32 = 0x80;
    /// 背板邮箱门铃
    pub const SBMBX: u32 = 0x98;
    pub const LINK_STATUS_CTRL: u32 = 0xBC;
}

/// BAR0 窗口大小
pub const REG_MAP_SIZE: u32 = 32 * 1024;

/// PCIE2 核心寄存器（相对核心基址）
pub mod pcie2 {
    pub const INTMASK: u32 = 0x24;
    pub const MAILBOXINT: u32 = 0x48;
    pub const MAILBOXMASK: u32 = 0x4C;
    pub const CONFIGADDR: u32 = 0x120;
    pub const CONFIGDATA: u32 = 0x124;
    pub const H2D_MAILBOX_0: u32 = 0x140;
    pub const H2D_MAILBOX_1: u32 = 0x144;
}

/// MAILBOXINT 位
pub mod int {
    pub const FN0_0: u32 = 0x0100;
    pub const FN0_1: u32 = 0x0200;
    /// 设备 → 主机邮箱数据
    pub const D2H_MB_DATA: u32 = FN0_0 | FN0_1;
    /// 设备 → 主机门铃（D2H0..D2H3，各两位）
    pub const D2H_DB: u32 = 0x00FF_0000;
    pub const ENABLED: u32 = D2H_DB | D2H_MB_DATA;
}

/// 共享结构 flags
pub mod shared_flags {
    pub const VERSION_MASK: u32 = 0x00FF;
    pub const DMA_INDEX: u32 = 0x1_0000;
    pub const DMA_2B_IDX: u32 = 0x10_0000;
    pub const HOSTRDY_DB1: u32 = 0x1000_0000;
}

pub const MIN_SHARED_VERSION: u32 = 5;
pub const MAX_SHARED_VERSION: u32 = 7;
/// 自此版本起 ring info 分别给出提交环与完成环数量
pub const SHARED_VERSION_6: u32 = 6;
pub const SHARED_VERSION_7: u32 = 7;

/// 共享结构字段偏移
pub mod shared {
    pub const FLAGS: u32 = 0;
    pub const CONSOLE_ADDR: u32 = 20;
    pub const MAX_RXBUFPOST: u32 = 34;
    pub const RX_DATAOFFSET: u32 = 36;
    pub const HTOD_MB_DATA_ADDR: u32 = 40;
    pub const DTOH_MB_DATA_ADDR: u32 = 44;
    pub const RING_INFO_ADDR: u32 = 48;
    pub const DMA_SCRATCH_LEN: u32 = 52;
    pub const DMA_SCRATCH_ADDR: u32 = 56;
    pub const DMA_RINGUPD_LEN: u32 = 64;
    pub const DMA_RINGUPD_ADDR: u32 = 68;
    /// 共享结构至少覆盖到此
    pub const LEN: usize = 76;
}

/// ring info 字段偏移
pub mod ringinfo {
    pub const RINGMEM: u32 = 0;
    pub const H2D_W_IDX_PTR: u32 = 4;
    pub const H2D_R_IDX_PTR: u32 = 8;
    pub const D2H_W_IDX_PTR: u32 = 12;
    pub const D2H_R_IDX_PTR: u32 = 16;
    pub const H2D_W_IDX_HADDR: u32 = 20;
    pub const H2D_R_IDX_HADDR: u32 = 28;
    pub const D2H_W_IDX_HADDR: u32 = 36;
    pub const D2H_R_IDX_HADDR: u32 = 44;
    pub const MAX_FLOWRINGS: u32 = 52;
    pub const MAX_SUBMISSIONRINGS: u32 = 54;
    pub const MAX_COMPLETIONRINGS: u32 = 56;
    pub const LEN: usize = 58;
}

/// 设备侧环描述（ring mem）字段偏移
pub mod ringmem {
    pub const MAX_ITEM: u32 = 4;
    pub const LEN_ITEMS: u32 = 6;
    pub const BASE_ADDR: u32 = 8;
    pub const SIZE: u32 = 16;
}

/// 控制台结构字段偏移
pub mod console {
    pub const BUFADDR: u32 = 8;
    pub const BUFSIZE: u32 = 12;
    pub const WRITEIDX: u32 = 16;
}

/// 设备 → 主机邮箱数据位
pub mod d2h_mb {
    pub const D3_ACK: u32 = 0x0000_0001;
    pub const DS_ENTER_REQ: u32 = 0x0000_0002;
    pub const DS_EXIT_NOTE: u32 = 0x0000_0004;
    pub const FWHALT: u32 = 0x1000_0000;
}

/// 主机 → 设备邮箱数据位
pub mod h2d_mb {
    pub const D3_INFORM: u32 = 0x0000_0001;
    pub const DS_ACK: u32 = 0x0000_0002;
    pub const D0_INFORM_IN_USE: u32 = 0x0000_0008;
    pub const D0_INFORM: u32 = 0x0000_0010;
}

/// 提交方向的公共环数
pub const H2D_COMMON_RINGS: usize = 2;
/// 完成方向的公共环数
pub const D2H_COMMON_RINGS: usize = 3;
pub const COMMON_RINGS: usize = H2D_COMMON_RINGS + D2H_COMMON_RINGS;
/// 设备声明的流环数上限
pub const MAX_FLOWRINGS: u16 = 512;

/// 各公共环深度
pub const RING_MAX_ITEM: [u16; COMMON_RINGS] = [64, 512, 64, 1024, 512];
/// 共享结构 v7 之前的条目大小
pub const RING_ITEMSIZE_PRE_V7: [u16; COMMON_RINGS] = [40, 32, 24, 16, 32];
pub const RING_ITEMSIZE: [u16; COMMON_RINGS] = [40, 32, 24, 24, 40];

/// 流环深度与条目大小
pub const FLOWRING_MAX_ITEM: u16 = 512;
pub const FLOWRING_ITEMSIZE: u16 = 48;

pub const DMA_D2H_SCRATCH_BUF_LEN: usize = 8;
pub const DMA_D2H_RINGUPD_BUF_LEN: usize = 1024;

/// 固件镜像内声明 RAM 大小的位置与魔数（"RAMS"）
pub const RAMSIZE_OFFSET: usize = 0x6C;
pub const RAMSIZE_MAGIC: u32 = 0x534D_4152;

pub const DEF_MAX_RXBUFPOST: u16 = 255;
