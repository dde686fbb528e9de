//! # mmc：SDIO 宿主接口
//!
//! 传输层向下依赖的 SDIO 宿主能力：
//!
//! | 模块      | 说明 |
//! |-----------|------|
//! | types     | SdioDeviceId、Broadcom 设备表 |
//! | sdio_func | SdioFunc：字节/字/长字读写、FIFO 与递增块传输、散列传输、块大小、使能、中断、host 占用 |
//! | cccr      | CCCR：中止传输、中断掩码、Broadcom 私有 F0 寄存器 |

#![no_std]

pub mod cccr;
pub mod sdio_func;
pub mod types;

pub use cccr::{
    brcm_f0_reg, sdio_abort, sdio_set_irq_mask, CccrAccess, F0Access, SDIO_CCCR_INT_ENABLE,
    SDIO_CCCR_INT_PENDING, SDIO_CCCR_IO_ABORT,
};
pub use sdio_func::{with_host_claimed, HostClaim, SdioFunc, SdioIrqHandler};
pub use types::{
    sdio_id_match, SdioDeviceId, BRCMF_SDIO_IDS, SDIO_FUNC_BLOCKSIZE_DEFAULT,
    SDIO_VENDOR_ID_BROADCOM, SDIO_VENDOR_ID_CYPRESS,
};
