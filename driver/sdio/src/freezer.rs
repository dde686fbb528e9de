//! 挂起协调
//!
//! 挂起方把状态切到 Draining，等所有登记过的 worker 在各自的检查点停下（`try_freeze`），
//! 全部到齐后进入 Frozen。恢复时切到 Resuming，等 worker 全部离开检查点再回到 Running。
//! 等待都是有界的；挂起超时则回退到 Running。

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use bus::{retry_with_interval, Delay, Error, Poll, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FreezeState {
    Running = 0,
    Draining = 1,
    Frozen = 2,
    Resuming = 3,
}

impl FreezeState {
    fn from_raw(v: u8) -> Self {
        match v {
            1 => Self::Draining,
            2 => Self::Frozen,
            3 => Self::Resuming,
            _ => Self::Running,
        }
    }
}

const FREEZE_STEP_US: u32 = 1000;
/// 挂起等待上限（毫秒）
const FREEZE_RETRIES: u32 = 500;

pub struct Freezer {
    state: AtomicU8,
    /// 登记的 worker 数
    expected: AtomicU32,
    /// 停在检查点的 worker 数
    frozen: AtomicU32,
}

impl Default for Freezer {
    fn default() -> Self {
        Self::new()
    }
}

impl Freezer {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(FreezeState::Running as u8),
            expected: AtomicU32::new(0),
            frozen: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> FreezeState {
        FreezeState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: FreezeState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn count_in(&self) {
        self.expected.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count_out(&self) {
        self.expected.fetch_sub(1, Ordering::AcqRel);
    }

    /// 请求冻结并等所有 worker 到齐
    pub fn freeze(&self, delay: &dyn Delay) -> Result<()> {
        self.freeze_bounded(delay, FREEZE_RETRIES)
    }

    pub(crate) fn freeze_bounded(&self, delay: &dyn Delay, retries: u32) -> Result<()> {
        if self.state() != FreezeState::Running {
            return Err(Error::Busy);
        }
        self.set_state(FreezeState::Draining);
        let res = retry_with_interval(delay, retries, FREEZE_STEP_US, "worker freeze", |_| {
            let frozen = self.frozen.load(Ordering::Acquire);
            let expected = self.expected.load(Ordering::Acquire);
            Ok(if frozen >= expected { Poll::Ready(()) } else { Poll::Pending })
        });
        match res {
            Ok(()) => {
                self.set_state(FreezeState::Frozen);
                log::debug!(target: "brcmfmac::sdio", "workers frozen");
                Ok(())
            }
            Err(e) => {
                log::error!(target: "brcmfmac::sdio", "freeze: {}", e);
                self.set_state(FreezeState::Running);
                Err(e)
            }
        }
    }

    /// worker 检查点：冻结期间停在这里，返回是否曾被冻结
    pub fn try_freeze(&self, delay: &dyn Delay) -> bool {
        if !matches!(self.state(), FreezeState::Draining | FreezeState::Frozen) {
            return false;
        }
        self.frozen.fetch_add(1, Ordering::AcqRel);
        while matches!(self.state(), FreezeState::Draining | FreezeState::Frozen) {
            delay.delay_us(FREEZE_STEP_US);
        }
        self.frozen.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// 放行所有 worker，等它们离开检查点
    pub fn resume(&self, delay: &dyn Delay) {
        if self.state() == FreezeState::Running {
            return;
        }
        self.set_state(FreezeState::Resuming);
        let res = retry_with_interval(delay, FREEZE_RETRIES, FREEZE_STEP_US, "worker resume", |_| {
            Ok(if self.frozen.load(Ordering::Acquire) == 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            })
        });
        if let Err(e) = res {
            log::warn!(target: "brcmfmac::sdio", "resume: {}", e);
        }
        self.set_state(FreezeState::Running);
    }
}

/// worker 登记凭据，drop 时注销
pub struct WorkerGuard<'a> {
    freezer: &'a Freezer,
}

impl<'a> WorkerGuard<'a> {
    pub fn new(freezer: &'a Freezer) -> Self {
        freezer.count_in();
        Self { freezer }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.freezer.count_out();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::SpinDelay;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    struct SleepDelay;

    impl Delay for SleepDelay {
        fn delay_us(&self, us: u32) {
            thread::sleep(std::time::Duration::from_micros(us as u64));
        }
    }

    #[test]
    fn freeze_without_workers_is_immediate() {
        let f = Freezer::new();
        f.freeze(&SpinDelay).unwrap();
        assert_eq!(f.state(), FreezeState::Frozen);
        f.resume(&SpinDelay);
        assert_eq!(f.state(), FreezeState::Running);
    }

    #[test]
    fn missing_worker_times_out_and_reverts() {
        let f = Freezer::new();
        let _g = WorkerGuard::new(&f);
        assert!(matches!(
            f.freeze_bounded(&SpinDelay, 3),
            Err(Error::TimedOut { .. })
        ));
        assert_eq!(f.state(), FreezeState::Running);
        assert!(!f.try_freeze(&SpinDelay));
    }

    #[test]
    fn worker_parks_until_resume() {
        let f = Arc::new(Freezer::new());
        let stop = Arc::new(AtomicBool::new(false));
        let parked = Arc::new(AtomicU32::new(0));

        let worker = {
            let (f, stop, parked) = (f.clone(), stop.clone(), parked.clone());
            thread::spawn(move || {
                let _g = WorkerGuard::new(&f);
                while !stop.load(Ordering::Acquire) {
                    if f.try_freeze(&SleepDelay) {
                        parked.fetch_add(1, Ordering::AcqRel);
                    }
                    thread::sleep(std::time::Duration::from_micros(200));
                }
            })
        };
        while f.expected.load(Ordering::Acquire) == 0 {
            thread::yield_now();
        }

        f.freeze(&SleepDelay).unwrap();
        assert_eq!(f.state(), FreezeState::Frozen);
        assert_eq!(f.frozen.load(Ordering::Acquire), 1);
        f.resume(&SleepDelay);
        assert_eq!(f.state(), FreezeState::Running);

        stop.store(true, Ordering::Release);
        worker.join().unwrap();
        assert_eq!(parked.load(Ordering::Acquire), 1);
        assert_eq!(f.expected.load(Ordering::Acquire), 0);
    }
}
