//! # bus：Broadcom FullMAC 传输层公共部分
//!
//! SDIO 与 PCIe 两种传输共享的类型：
//! - **error**：统一错误类型 [`Error`] 与 [`Result`]
//! - **ops**：上层总线操作 [`BusOps`]、总线状态 [`BusState`] 与观察者、收包交付 [`RxHandler`]、固件名查表
//! - **sync**：平台延时 [`Delay`] 与有界重试 [`retry_with_interval`]
//! - **console**：固件控制台环的按行读取 [`ConsoleLines`]
//! - **nvram**：NVRAM 镜像与长度令牌 [`nvram_image`]

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod console;
mod error;
mod nvram;
mod ops;
mod sync;

pub use console::{log_console_line, ConsoleLines, CONSOLE_LINE_MAX};
pub use error::{Error, Result};
pub use nvram::nvram_image;
pub use ops::{
    firmware_lookup, BusOps, BusState, BusStateObserver, ChipId, DiscardRx, FirmwareMapping,
    FirmwareNames, NoopObserver, RxHandler,
};
pub use sync::{retry_with_interval, Delay, Poll, SpinDelay, LOOPS_PER_MS};

/// 日志用十六进制前缀：最多打印前 32 字节
pub struct HexPrefix<'a>(pub &'a [u8]);

impl core::fmt::Display for HexPrefix<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let n = self.0.len().min(32);
        for (i, b) in self.0[..n].iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        if self.0.len() > 32 {
            write!(f, " ...")?;
        }
        Ok(())
    }
}
