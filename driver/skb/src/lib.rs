//! Socket buffer (skb) 模块
//!
//! - **[SkBuff]**：单包缓冲，`put`/`pull`/`push`/`trim`
//! - **[SkbQueue]**：FIFO 队列，用于收包链、glom 链
//! - **[PrioQueue]**：按优先级的发送队列

#![no_std]

extern crate alloc;

mod queue;
mod skbuff;

pub use queue::{PrioQueue, SkbQueue};
pub use skbuff::SkBuff;
