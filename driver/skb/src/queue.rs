//! SkbQueue：skb FIFO，用于发送队列、收包链与 glom 链

use alloc::collections::VecDeque;

use super::SkBuff;

/// skb FIFO 队列
#[derive(Debug, Default)]
pub struct SkbQueue {
    queue: VecDeque<SkBuff>,
}

impl SkbQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push_tail(&mut self, skb: SkBuff) {
        self.queue.push_back(skb);
    }

    pub fn pop_head(&mut self) -> Option<SkBuff> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 所有 skb 的 data 长度之和
    pub fn total_len(&self) -> usize {
        self.queue.iter().map(SkBuff::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkBuff> {
        self.queue.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SkBuff> {
        self.queue.iter_mut()
    }

    /// 清空并丢弃所有 skb，返回丢弃数
    pub fn purge(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

/// 多优先级发送队列：数值越小优先级越高，出队总从最高非空优先级取
#[derive(Debug)]
pub struct PrioQueue {
    queues: [SkbQueue; PrioQueue::MAX_PRIO],
    max_len: usize,
}

impl PrioQueue {
    pub const MAX_PRIO: usize = 8;

    /// `max_len` 为所有优先级合计上限
    pub fn new(max_len: usize) -> Self {
        PrioQueue {
            queues: Default::default(),
            max_len,
        }
    }

    /// 入队；已满时退回 skb
    pub fn enqueue(&mut self, skb: SkBuff, prio: usize) -> Result<(), SkBuff> {
        if self.len() >= self.max_len {
            return Err(skb);
        }
        let p = prio.min(Self::MAX_PRIO - 1);
        self.queues[p].push_tail(skb);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<SkBuff> {
        self.queues.iter_mut().find_map(SkbQueue::pop_head)
    }

    /// 跳过 `blocked` 中置位的优先级出队（bit i 对应优先级 i）
    pub fn dequeue_masked(&mut self, blocked: u8) -> Option<SkBuff> {
        self.queues
            .iter_mut()
            .enumerate()
            .filter(|(p, _)| blocked & (1 << p) == 0)
            .find_map(|(_, q)| q.pop_head())
    }

    /// 未被 `blocked` 屏蔽的包数
    pub fn len_unblocked(&self, blocked: u8) -> usize {
        self.queues
            .iter()
            .enumerate()
            .filter(|(p, _)| blocked & (1 << p) == 0)
            .map(|(_, q)| q.len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(SkbQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(SkbQueue::is_empty)
    }

    pub fn purge(&mut self) -> usize {
        self.queues.iter_mut().map(SkbQueue::purge).sum()
    }
}
