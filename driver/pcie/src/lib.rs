//! # pcie：PCIe 传输
//!
//! BAR0 窗口访问背板，BAR2 访问设备 RAM（TCM），控制与数据经 DMA 消息环交换。
//!
//! | 模块     | 说明 |
//! |----------|------|
//! | device   | [`PcieDev`]：配置空间、BAR0 窗口、TCM、DMA 缓冲与设备状态机，实现芯片层回调 |
//! | bus      | [`PcieBus`]：attach、固件下载、init/stop、控制消息 |
//! | shared   | 共享结构、ring info、固件控制台 |
//! | ring     | 公共环与流环，下标放在 TCM 或主机 DMA 缓冲 |
//! | irq      | 中断两段处理、邮箱数据、D3 挂起/恢复 |
//! | regs     | 配置空间、PCIE2 核心寄存器与共享结构偏移 |

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod bus;
mod config;
mod counters;
mod device;
mod irq;
pub mod regs;
mod ring;
mod shared;

#[cfg(test)]
mod mock;

pub use crate::bus::{NoConsumer, PcieBus, RingConsumer, PCIE_FW_TABLE};
pub use crate::config::PcieConfig;
pub use crate::counters::PcieCounters;
pub use crate::device::{DmaBuffer, PcieDev, PcieDevice, PcieState};
pub use crate::ring::{CommonRingId, MsgRing, PcieRings};
pub use crate::shared::{PcieConsole, PcieShared, RingInfo};
