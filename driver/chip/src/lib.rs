//! # chip：背板管理
//!
//! 识别芯片、枚举背板上的核心、禁用/复位/激活核心、测定 RAM 大小、判断保存/恢复能力。
//!
//! - **chip**：[`Chip`] 与总线回调 [`BuscoreOps`]
//! - **backplane**：核心描述 [`Core`] 与两种背板的握手
//! - **erom**：动态协议背板描述表扫描
//! - **regs**：寄存器与 ID 常量

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod chip;
mod backplane;
mod erom;
pub mod regs;


pub use crate::chip::{BuscoreOps, Chip, ChipInfo, CpuKind};
pub use crate::backplane::{Backplane, Core};
pub use crate::erom::SizeClass;
