//! SkBuff：带前后预留空间的包缓冲
//!
//! 布局：`[ headroom | data (len) | tailroom ]`。SDPCM 发送路径在 headroom 内压入硬件/软件头，
//! 接收路径读入整帧后 `pull` 掉帧头再交给上层。

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

/// 单包缓冲
///
/// - `put(n)`：尾部追加 n 字节
/// - `pull(n)`：头部消费 n 字节
/// - `push(n)`：在 data 前占用 n 字节 headroom
/// - `trim(n)`：截断到 n 字节
#[derive(Clone, Default)]
pub struct SkBuff {
    /// [0..head] = headroom, [head..head+len] = data, [head+len..] = tailroom
    storage: Vec<u8>,
    head: usize,
    len: usize,
    /// 802.1D 优先级（0..7）
    priority: u8,
}

impl SkBuff {
    /// 分配指定总容量的缓冲，data 长度为 0
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配容量并预留 headroom 字节
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        let mut storage = Vec::new();
        storage.resize(capacity, 0);
        SkBuff {
            storage,
            head: headroom.min(capacity),
            len: 0,
            priority: 0,
        }
    }

    /// 复制 `data` 构造缓冲，前端预留 `headroom`
    pub fn from_slice(data: &[u8], headroom: usize) -> Self {
        let mut skb = Self::alloc_with_headroom(headroom + data.len(), headroom);
        if let Some(dst) = skb.put(data.len()) {
            dst.copy_from_slice(data);
        }
        skb
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.head + self.len]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.head + self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, prio: u8) {
        self.priority = prio & 0x7;
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.storage.len() - (self.head + self.len)
    }

    /// 尾部追加 n 字节，返回新增区域；空间不足返回 None
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.head + self.len;
        self.len += n;
        Some(&mut self.storage[start..start + n])
    }

    /// 追加 n 个零字节（发送填充用），tailroom 不足时扩容
    pub fn put_zeroed(&mut self, n: usize) {
        if self.tailroom() < n {
            let grow = n - self.tailroom();
            self.storage.resize(self.storage.len() + grow, 0);
        }
        let start = self.head + self.len;
        self.storage[start..start + n].fill(0);
        self.len += n;
    }

    /// 头部消费 n 字节
    pub fn pull(&mut self, n: usize) {
        let consume = n.min(self.len);
        self.head += consume;
        self.len -= consume;
    }

    /// 在 data 前占用 n 字节 headroom；不足返回 false
    pub fn push(&mut self, n: usize) -> bool {
        if self.head < n {
            return false;
        }
        self.head -= n;
        self.len += n;
        true
    }

    /// 截断 data 到 n 字节（n 大于当前长度时不变）
    pub fn trim(&mut self, n: usize) {
        self.len = self.len.min(n);
    }

    /// 设置 data 长度，受存储上限约束（收包写入后调用）
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.storage.len() - self.head);
    }

    /// data 起始地址对 `align` 的偏移（模拟 DMA 对齐检查）
    pub fn data_align_offset(&self, align: usize) -> usize {
        if align == 0 {
            return 0;
        }
        (self.storage.as_ptr() as usize + self.head) % align
    }
}

impl Deref for SkBuff {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl DerefMut for SkBuff {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl core::fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SkBuff")
            .field("len", &self.len)
            .field("headroom", &self.head)
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skb_put_pull_push() {
        let mut skb = SkBuff::alloc_with_headroom(64, 12);
        assert_eq!(skb.headroom(), 12);
        skb.put(4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert!(skb.push(12));
        assert_eq!(skb.len(), 16);
        assert!(!skb.push(1));
        skb.pull(12);
        assert_eq!(skb.data(), &[1, 2, 3, 4]);
        skb.trim(2);
        assert_eq!(skb.data(), &[1, 2]);
    }

    #[test]
    fn skb_put_zeroed_grows() {
        let mut skb = SkBuff::from_slice(&[9, 9], 0);
        skb.put_zeroed(6);
        assert_eq!(skb.data(), &[9, 9, 0, 0, 0, 0, 0, 0]);
        assert_eq!(skb.tailroom(), 0);
    }
}
