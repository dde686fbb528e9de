//! brcmfmac 传输核心
//!
//! Broadcom FullMAC 无线芯片的总线传输层：背板管理、消息环、SDIO 与 PCIe 两种传输
//! - chip: 识别芯片、枚举核心、复位/激活 CPU、测定 RAM
//! - commonring: 主机与设备之间的定长槽环
//! - sdio: SDPCM 帧、发送窗口、聚合、时钟与电源状态机
//! - pcie: BAR 窗口、固件握手、DMA 消息环、邮箱中断
//!
//! 上层协议经 [`BusOps`] 使用任一传输。

#![no_std]

extern crate alloc;

pub use bus;
pub use chip;
pub use commonring;
pub use mmc;
pub use pcie;
pub use sdio;
pub use skb;

pub use bus::{BusOps, BusState, BusStateObserver, ChipId, Error, FirmwareNames, Result};

use alloc::boxed::Box;

/// 已接入的一条传输；上层按此持有总线而不关心具体类型
pub enum Transport<F: mmc::SdioFunc, D: pcie::PcieDevice> {
    Sdio(Box<sdio::SdioBus<F>>),
    Pcie(Box<pcie::PcieBus<D>>),
}

impl<F: mmc::SdioFunc, D: pcie::PcieDevice> Transport<F, D> {
    pub fn ops(&self) -> &dyn BusOps {
        match self {
            Transport::Sdio(bus) => &**bus,
            Transport::Pcie(bus) => &**bus,
        }
    }

    /// 下载固件与 NVRAM 后进入 DATA 状态
    pub fn bring_up(&self, fw: &[u8], nvram: &[u8]) -> Result<()> {
        log::info!(target: "brcmfmac::bus", "bring up {}", self.ops().chip_id());
        match self {
            Transport::Sdio(bus) => bus.download(fw, nvram)?,
            Transport::Pcie(bus) => bus.download(fw, nvram)?,
        }
        self.ops().init()
    }
}
