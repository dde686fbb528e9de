//! # commonring：消息环
//!
//! 主机与设备之间交换消息流的固定深度环形缓冲：[`Commonring`] 持有槽数组与游标，
//! 通过 [`RingCallbacks`] 与对端同步游标、敲门铃。

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod ring;

pub use ring::{Commonring, NoCallbacks, RingCallbacks, RingGuard};
