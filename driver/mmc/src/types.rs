//! SDIO 设备 ID 与 Broadcom 设备表

/// SDIO 设备 ID（用于驱动匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdioDeviceId {
    pub vendor: u16,
    pub device: u16,
}

impl SdioDeviceId {
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self { vendor, device }
    }
}

/// Broadcom SDIO 厂商 ID
pub const SDIO_VENDOR_ID_BROADCOM: u16 = 0x02d0;
/// Cypress 收购后部分芯片使用的厂商 ID
pub const SDIO_VENDOR_ID_CYPRESS: u16 = 0x04b4;

/// 本驱动支持的 SDIO 设备（F1 的 vendor/device）
pub const BRCMF_SDIO_IDS: &[SdioDeviceId] = &[
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4324), // 43143
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa887), // 43241
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4329), // 4329
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4330), // 4330
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4334), // 4334
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa94c), // 43340
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa94d), // 43341
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4335), // 4335/4339
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4339), // 4339
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa962), // 43362
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa9bf), // 43364
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa9a6), // 43430
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4345), // 4345
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0xa9af), // 43455
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4354), // 4354
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4356), // 4356
    SdioDeviceId::new(SDIO_VENDOR_ID_BROADCOM, 0x4359), // 4359
    SdioDeviceId::new(SDIO_VENDOR_ID_CYPRESS, 0x4373), // 4373
    SdioDeviceId::new(SDIO_VENDOR_ID_CYPRESS, 0xa804), // 43012
    SdioDeviceId::new(SDIO_VENDOR_ID_CYPRESS, 0xa887), // 43752
    SdioDeviceId::new(SDIO_VENDOR_ID_CYPRESS, 0x4355), // 89359
];

/// 根据 F1 的 vendor/device 判断是否为支持的设备
#[inline]
pub fn sdio_id_match(vendor: u16, device: u16) -> bool {
    BRCMF_SDIO_IDS
        .iter()
        .any(|id| id.vendor == vendor && id.device == device)
}

/// 默认块大小
pub const SDIO_FUNC_BLOCKSIZE_DEFAULT: u16 = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_table_match() {
        assert!(sdio_id_match(SDIO_VENDOR_ID_BROADCOM, 0x4339));
        assert!(!sdio_id_match(SDIO_VENDOR_ID_CYPRESS, 0x4339));
    }
}
