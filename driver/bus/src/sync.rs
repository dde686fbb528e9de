//! 延时与有界重试
//!
//! - **Delay**：由平台提供的延时接口；无时钟时用 [`SpinDelay`] 忙等近似
//! - **retry_with_interval**：KSO 握手、邮箱命令等待、固件就绪等待共用的有界轮询

use crate::error::{Error, Result};

/// 延时接口（no_std 下由平台实现，如定时器或忙等）
pub trait Delay {
    /// 延时约 us 微秒
    fn delay_us(&self, us: u32);

    /// 延时约 ms 毫秒
    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }
}

impl<D: Delay + ?Sized> Delay for &D {
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}

/// 忙等延时的每毫秒循环数（无精确时钟时为启发式近似）
pub const LOOPS_PER_MS: u32 = 1000;

/// 忙等延时，时长与 CPU 频率相关
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

impl Delay for SpinDelay {
    #[inline]
    fn delay_us(&self, us: u32) {
        let limit = us.saturating_mul(LOOPS_PER_MS) / 1000;
        for _ in 0..limit.max(1) {
            core::hint::spin_loop();
        }
    }
}

/// 单次轮询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// 有界重试：最多执行 `retries` 次 `f`，每次未就绪后延时 `interval_us`。
///
/// `f` 返回 `Err` 立即中止并向上传播；全部未就绪返回 `Error::TimedOut { what }`。
pub fn retry_with_interval<T, F>(
    delay: &dyn Delay,
    retries: u32,
    interval_us: u32,
    what: &'static str,
    mut f: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<Poll<T>>,
{
    for attempt in 0..retries {
        if let Poll::Ready(v) = f(attempt)? {
            return Ok(v);
        }
        if attempt + 1 < retries {
            delay.delay_us(interval_us);
        }
    }
    log::debug!(target: "brcmfmac::bus", "{} not ready after {} retries", what, retries);
    Err(Error::TimedOut { what })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;

    /// 记录累计延时的测试用 Delay
    #[derive(Default)]
    pub struct CountingDelay {
        pub total_us: Cell<u64>,
    }

    impl Delay for CountingDelay {
        fn delay_us(&self, us: u32) {
            self.total_us.set(self.total_us.get() + us as u64);
        }
    }

    #[test]
    fn retry_succeeds_on_third_attempt() {
        let d = CountingDelay::default();
        let r = retry_with_interval(&d, 5, 10, "flag", |n| {
            Ok(if n == 2 { Poll::Ready(n) } else { Poll::Pending })
        });
        assert_eq!(r, Ok(2));
        assert_eq!(d.total_us.get(), 20);
    }

    #[test]
    fn retry_times_out() {
        let d = CountingDelay::default();
        let r: Result<()> = retry_with_interval(&d, 3, 10, "flag", |_| Ok(Poll::Pending));
        assert_eq!(r, Err(Error::TimedOut { what: "flag" }));
        assert_eq!(d.total_us.get(), 20);
    }

    #[test]
    fn retry_propagates_error() {
        let d = CountingDelay::default();
        let r: Result<()> = retry_with_interval(&d, 3, 10, "flag", |_| Err(Error::NoMedium));
        assert_eq!(r, Err(Error::NoMedium));
    }
}
