//! 通用环形缓冲
//!
//! 固定深度、固定条目大小的环，读写游标满足 `0 <= cursor < depth`，最多 depth-1 个条目在途。
//! 槽位存放在按条目步长切分的数组里，通过下标访问。
//! 游标的所有修改都在 [`Commonring::lock`] 返回的 guard 内进行。

use alloc::vec::Vec;

use bus::{Error, Result};

/// 环与对端同步的回调
///
/// `pull_*` 返回 `None` 表示沿用本地缓存的游标；默认实现全部为空操作，
/// 门铃默认返回 IO 错误（未接门铃的环无法提交写入）。
pub trait RingCallbacks {
    /// 通知对端有新条目
    fn ring_bell(&self) -> Result<()> {
        Err(Error::Io { code: -5 })
    }

    /// 从对端取最新读游标
    fn pull_rptr(&self) -> Result<Option<u16>> {
        Ok(None)
    }

    /// 从对端取最新写游标
    fn pull_wptr(&self) -> Result<Option<u16>> {
        Ok(None)
    }

    /// 向对端发布读游标
    fn push_rptr(&self, _r_ptr: u16) -> Result<()> {
        Ok(())
    }

    /// 向对端发布写游标
    fn push_wptr(&self, _w_ptr: u16) -> Result<()> {
        Ok(())
    }
}

/// 未绑定任何回调
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl RingCallbacks for NoCallbacks {}

#[derive(Debug, Default)]
struct RingState {
    depth: u16,
    item_len: u16,
    r_ptr: u16,
    w_ptr: u16,
    was_full: bool,
    /// 设备可见的缓冲地址
    buf_addr: u64,
    slots: Vec<u8>,
}

impl RingState {
    fn available(&self) -> u16 {
        if self.r_ptr <= self.w_ptr {
            self.depth - self.w_ptr + self.r_ptr
        } else {
            self.r_ptr - self.w_ptr
        }
    }

    fn slot_range(&self, idx: u16, count: u16) -> core::ops::Range<usize> {
        let start = idx as usize * self.item_len as usize;
        start..start + count as usize * self.item_len as usize
    }
}

/// 一个环
pub struct Commonring<C> {
    callbacks: C,
    state: spin::Mutex<RingState>,
}

impl<C: RingCallbacks> Commonring<C> {
    pub fn new(callbacks: C) -> Self {
        Self {
            callbacks,
            state: spin::Mutex::new(RingState::default()),
        }
    }

    /// 设定深度、条目大小与设备地址；游标归零并发布写游标
    pub fn configure(&self, depth: u16, item_len: u16, buf_addr: u64) -> Result<()> {
        if depth < 2 || item_len == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut st = self.state.lock();
        st.depth = depth;
        st.item_len = item_len;
        st.buf_addr = buf_addr;
        st.r_ptr = 0;
        st.w_ptr = 0;
        st.was_full = false;
        st.slots.clear();
        st.slots.resize(depth as usize * item_len as usize, 0);
        log::debug!(
            target: "brcmfmac::ring",
            "configure depth {} item {} @ {:#x}",
            depth, item_len, buf_addr
        );
        self.callbacks.push_wptr(0)
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    /// 取得环锁
    pub fn lock(&self) -> RingGuard<'_, C> {
        RingGuard {
            callbacks: &self.callbacks,
            st: self.state.lock(),
        }
    }
}

/// 持锁期间的环操作
pub struct RingGuard<'a, C> {
    callbacks: &'a C,
    st: spin::MutexGuard<'a, RingState>,
}

impl<C: RingCallbacks> RingGuard<'_, C> {
    pub fn depth(&self) -> u16 {
        self.st.depth
    }

    pub fn item_len(&self) -> u16 {
        self.st.item_len
    }

    pub fn r_ptr(&self) -> u16 {
        self.st.r_ptr
    }

    pub fn w_ptr(&self) -> u16 {
        self.st.w_ptr
    }

    pub fn buf_addr(&self) -> u64 {
        self.st.buf_addr
    }

    pub fn was_full(&self) -> bool {
        self.st.was_full
    }

    /// 用对端读游标刷新本地缓存
    fn refresh_rptr(&mut self) -> Result<()> {
        if let Some(r) = self.callbacks.pull_rptr()? {
            if r < self.st.depth {
                self.st.r_ptr = r;
            }
        }
        Ok(())
    }

    /// 是否可写；满后需空出超过 depth/8 个槽才恢复
    pub fn write_available(&mut self) -> Result<bool> {
        let mut retry = true;
        loop {
            let available = self.st.available();
            if available > 1 {
                if !self.st.was_full {
                    return Ok(true);
                }
                if available > self.st.depth / 8 {
                    self.st.was_full = false;
                    return Ok(true);
                }
                if retry {
                    self.refresh_rptr()?;
                    retry = false;
                    continue;
                }
                return Ok(false);
            }
            if retry {
                self.refresh_rptr()?;
                retry = false;
                continue;
            }
            self.st.was_full = true;
            return Ok(false);
        }
    }

    fn advance_w(&mut self, n: u16) {
        self.st.w_ptr += n;
        if self.st.w_ptr == self.st.depth {
            self.st.w_ptr = 0;
        }
    }

    /// 预留一个槽；满时返回 None
    pub fn reserve_for_write(&mut self) -> Result<Option<&mut [u8]>> {
        Ok(self.reserve_for_write_multiple(1)?.map(|(slots, _)| slots))
    }

    /// 预留至多 `n` 个连续槽，不跨越环尾；返回槽区与实际数量
    pub fn reserve_for_write_multiple(&mut self, n: u16) -> Result<Option<(&mut [u8], u16)>> {
        if n == 0 {
            return Ok(None);
        }
        let mut retry = true;
        loop {
            let available = self.st.available();
            if available > 1 {
                let start = self.st.w_ptr;
                let mut alloced = n.min(available - 1);
                if alloced + start > self.st.depth {
                    alloced = self.st.depth - start;
                }
                self.advance_w(alloced);
                let range = self.st.slot_range(start, alloced);
                return Ok(Some((&mut self.st.slots[range], alloced)));
            }
            if retry {
                self.refresh_rptr()?;
                retry = false;
                continue;
            }
            self.st.was_full = true;
            return Ok(None);
        }
    }

    /// 提交已写入的槽：发布写游标并敲门铃
    pub fn write_complete(&mut self) -> Result<()> {
        self.callbacks.push_wptr(self.st.w_ptr)?;
        self.callbacks.ring_bell()
    }

    /// 撤销最近预留的 `n` 个槽
    pub fn write_cancel(&mut self, n: u16) {
        let depth = self.st.depth;
        if depth == 0 {
            return;
        }
        let n = n % depth;
        self.st.w_ptr = (self.st.w_ptr + depth - n) % depth;
    }

    /// 取连续的未读条目；回绕时只返回到环尾，调用方需再次调用
    pub fn get_read_ptr(&mut self) -> Result<Option<(&[u8], u16)>> {
        if let Some(w) = self.callbacks.pull_wptr()? {
            if w < self.st.depth {
                self.st.w_ptr = w;
            }
        }
        let n = if self.st.w_ptr >= self.st.r_ptr {
            self.st.w_ptr - self.st.r_ptr
        } else {
            self.st.depth - self.st.r_ptr
        };
        if n == 0 {
            return Ok(None);
        }
        let range = self.st.slot_range(self.st.r_ptr, n);
        Ok(Some((&self.st.slots[range], n)))
    }

    /// 消费 `n` 个条目并发布读游标
    pub fn read_complete(&mut self, n: u16) -> Result<()> {
        self.st.r_ptr += n;
        if self.st.r_ptr >= self.st.depth {
            self.st.r_ptr -= self.st.depth;
        }
        self.callbacks.push_rptr(self.st.r_ptr)
    }

    /// 按下标访问槽（对端写入的内容）
    pub fn slot(&self, idx: u16) -> Option<&[u8]> {
        if idx >= self.st.depth {
            return None;
        }
        let range = self.st.slot_range(idx, 1);
        Some(&self.st.slots[range])
    }

    pub fn slot_mut(&mut self, idx: u16) -> Option<&mut [u8]> {
        if idx >= self.st.depth {
            return None;
        }
        let range = self.st.slot_range(idx, 1);
        Some(&mut self.st.slots[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::vec::Vec;

    #[derive(Default)]
    struct Bell {
        rings: Cell<u32>,
        pushes: Cell<u32>,
        wptr: Cell<u16>,
        rptr: Cell<u16>,
        /// 对端声明的读游标，由 pull_rptr 返回
        peer_r: Cell<Option<u16>>,
    }

    impl RingCallbacks for Bell {
        fn ring_bell(&self) -> Result<()> {
            self.rings.set(self.rings.get() + 1);
            Ok(())
        }
        fn pull_rptr(&self) -> Result<Option<u16>> {
            Ok(self.peer_r.get())
        }
        fn push_wptr(&self, w: u16) -> Result<()> {
            self.pushes.set(self.pushes.get() + 1);
            self.wptr.set(w);
            Ok(())
        }
        fn push_rptr(&self, r: u16) -> Result<()> {
            self.rptr.set(r);
            Ok(())
        }
    }

    fn write_one<C: RingCallbacks>(ring: &Commonring<C>, v: u8) -> bool {
        let mut g = ring.lock();
        match g.reserve_for_write().unwrap() {
            Some(slot) => {
                slot.fill(v);
                g.write_complete().unwrap();
                true
            }
            None => false,
        }
    }

    fn read_all<C: RingCallbacks>(ring: &Commonring<C>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut g = ring.lock();
        let item = g.item_len() as usize;
        while let Some((items, n)) = g.get_read_ptr().unwrap() {
            out.extend(items.chunks(item).map(|c| c[0]));
            g.read_complete(n).unwrap();
        }
        out
    }

    #[test]
    fn fifo_order_across_wrap() {
        let ring = Commonring::new(Bell::default());
        ring.configure(5, 8, 0x1000).unwrap();
        let mut next = 0u8;
        let mut expect = Vec::new();
        for round in 0..4 {
            for _ in 0..(round % 3 + 2) {
                assert!(write_one(&ring, next));
                expect.push(next);
                next += 1;
            }
            assert_eq!(read_all(&ring), expect);
            expect.clear();
        }
        assert_eq!(ring.callbacks().rings.get(), next as u32);
        assert_eq!(ring.callbacks().rptr.get(), ring.lock().r_ptr());
    }

    #[test]
    fn holds_depth_minus_one() {
        let ring = Commonring::new(Bell::default());
        ring.configure(8, 4, 0).unwrap();
        for i in 0..7 {
            assert!(ring.lock().write_available().unwrap());
            assert!(write_one(&ring, i));
        }
        assert!(!ring.lock().write_available().unwrap());
        assert!(!write_one(&ring, 7));
        assert!(ring.lock().was_full());
        // 消费 3 个后 free = 4 > 8/8，恢复可写
        let mut g = ring.lock();
        g.get_read_ptr().unwrap();
        g.read_complete(3).unwrap();
        assert!(g.write_available().unwrap());
    }

    #[test]
    fn full_hysteresis_uses_fresh_rptr() {
        let ring = Commonring::new(Bell::default());
        ring.configure(32, 4, 0).unwrap();
        for i in 0..31 {
            assert!(write_one(&ring, i));
        }
        assert!(!ring.lock().write_available().unwrap());
        // 对端只读走 2 个：free = 3，不超过 32/8
        ring.callbacks().peer_r.set(Some(2));
        assert!(!ring.lock().write_available().unwrap());
        ring.callbacks().peer_r.set(Some(5));
        assert!(ring.lock().write_available().unwrap());
    }

    #[test]
    fn multiple_reserve_stops_at_wrap() {
        let ring = Commonring::new(NoCallbacks);
        ring.configure(8, 2, 0).unwrap();
        let mut g = ring.lock();
        let (_, n) = g.reserve_for_write_multiple(5).unwrap().unwrap();
        assert_eq!(n, 5);
        g.read_complete(5).unwrap();
        let (slots, n) = g.reserve_for_write_multiple(6).unwrap().unwrap();
        assert_eq!((slots.len(), n), (6, 3));
        assert_eq!(g.w_ptr(), 0);
    }

    #[test]
    fn commit_across_wrap_pushes_once() {
        let ring = Commonring::new(Bell::default());
        ring.configure(8, 2, 0).unwrap();
        assert_eq!(ring.callbacks().pushes.get(), 1);
        {
            let mut g = ring.lock();
            g.reserve_for_write_multiple(6).unwrap().unwrap();
            g.write_complete().unwrap();
            g.read_complete(6).unwrap();
            let (_, n) = g.reserve_for_write_multiple(4).unwrap().unwrap();
            assert_eq!(n, 2);
            assert!(g.reserve_for_write().unwrap().is_some());
            g.write_complete().unwrap();
        }
        let bell = ring.callbacks();
        assert_eq!(bell.pushes.get(), 3);
        assert_eq!(bell.wptr.get(), 1);
        assert_eq!(bell.rings.get(), 2);
    }

    #[test]
    fn write_cancel_restores_wptr() {
        let ring = Commonring::new(NoCallbacks);
        ring.configure(6, 4, 0).unwrap();
        let mut g = ring.lock();
        // 先把游标推到环尾附近，覆盖回绕情形
        g.reserve_for_write_multiple(4).unwrap();
        g.read_complete(4).unwrap();
        for n in 1..=4u16 {
            for k in 0..=n {
                let before = g.w_ptr();
                let (_, got) = g.reserve_for_write_multiple(n).unwrap().unwrap();
                let k = k.min(got);
                g.write_cancel(k);
                assert_eq!(g.w_ptr(), (before + got - k) % 6);
                g.write_cancel(got - k);
                assert_eq!(g.w_ptr(), before);
            }
        }
    }

    #[test]
    fn complete_without_bell_is_io_error() {
        let ring = Commonring::new(NoCallbacks);
        ring.configure(4, 4, 0).unwrap();
        let mut g = ring.lock();
        g.reserve_for_write().unwrap().unwrap();
        assert_eq!(g.write_complete(), Err(Error::Io { code: -5 }));
    }
}
