//! # sdio：SDIO 传输
//!
//! 经 F1 访问背板与设备 RAM，经 F2 收发 SDPCM 帧。
//!
//! | 模块     | 说明 |
//! |----------|------|
//! | device   | [`SdioDev`]：F1/F2 访问、背板窗口、设备状态机，实现芯片层回调 |
//! | bus      | [`SdioBus`]：attach、init/stop、数据与控制帧接口 |
//! | clock    | 时钟状态、KSO、保存/恢复、总线睡眠 |
//! | sdpcm    | 帧头编解码与发送窗口 |
//! | glom     | 聚合收发 |
//! | rx / tx  | 收帧、发帧与重传 |
//! | dpc      | 中断、DPC、看门狗 |
//! | fw       | 固件与 NVRAM 下载 |
//! | shared   | 共享区、固件控制台、死机诊断 |
//! | freezer  | 挂起时停住 worker |

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod bus;
mod clock;
mod config;
mod counters;
mod device;
mod dpc;
mod freezer;
mod fw;
pub mod glom;
pub mod regs;
mod rx;
pub mod sdpcm;
mod shared;
mod tx;

#[cfg(test)]
mod mock;

pub use crate::bus::{SdioBus, SDIO_FW_TABLE};
pub use crate::clock::ClkState;
pub use crate::config::{SdioConfig, SrMode};
pub use crate::counters::SdioCounters;
pub use crate::device::{DevState, SdioDev};
pub use crate::freezer::{FreezeState, Freezer, WorkerGuard};
pub use crate::shared::{SharedInfo, TrapRecord};
