//! 发包
//!
//! 数据帧在 `txdata` 时已经在头部留出 SDPCM 头空间。发送时按设备窗口与流控位图出队，
//! 聚合模式下一次写出一条链：每帧带扩展头，尾部按 sg 对齐补齐，末帧补到块大小整数倍，
//! 首帧硬件头改写为整链长度。

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use bus::{Error, Result};
use mmc::SdioFunc;
use skb::SkBuff;

use crate::bus::{SdioBus, SdioInner, TXLOW};
use crate::device::DevState;
use crate::glom;
use crate::regs::{self, f1};
use crate::sdpcm::{data_ok, update_hwhdr, Channel, TxHeader};

/// 写帧失败后等设备清空计数的次数
const WF_TERM_POLLS: usize = 3;

impl<F: SdioFunc> SdioBus<F> {
    /// 终止当前写帧
    pub(crate) fn txfail(&self, inner: &mut SdioInner) {
        let dev = self.dev();
        log::error!(target: "brcmfmac::sdio", "sdio error, abort command and terminate frame");
        inner.cnt.tx_sderrs += 1;
        let _ = dev.abort_f2();
        let _ = dev.writeb(f1::FRAMECTRL, regs::SFC_WF_TERM);
        inner.cnt.f1regdata += 1;
        for _ in 0..WF_TERM_POLLS {
            let hi = dev.readb(f1::WFRAMEBCHI).unwrap_or(0);
            let lo = dev.readb(f1::WFRAMEBCLO).unwrap_or(0);
            inner.cnt.f1regdata += 2;
            if hi == 0 && lo == 0 {
                break;
            }
        }
    }

    /// 头部对齐：返回补在头后的字节数；空间不够时重新分配
    fn txpkt_hdalign(&self, pkt: &mut SkBuff) -> usize {
        let head_pad = pkt.data_align_offset(self.config.head_align);
        if head_pad == 0 {
            return 0;
        }
        if !pkt.push(head_pad) {
            let prio = pkt.priority();
            let mut copy = SkBuff::from_slice(pkt.data(), head_pad + self.config.head_align);
            copy.set_priority(prio);
            let pad = copy.data_align_offset(self.config.head_align);
            copy.push(pad);
            *pkt = copy;
            pkt.data_mut()[..self.tx_hdrlen + pad].fill(0);
            return pad;
        }
        pkt.data_mut()[..self.tx_hdrlen + head_pad].fill(0);
        head_pad
    }

    /// 写入各帧头，必要时插入对齐包；返回待写的链
    fn txpkt_prep(&self, inner: &SdioInner, pkts: Vec<SkBuff>, chan: Channel) -> Vec<SkBuff> {
        let n = pkts.len();
        let glom_chain = self.config.txglom && n > 1;
        let mut chain = Vec::with_capacity(n + 1);
        let mut txseq = inner.tx_seq;
        let mut total_len = 0usize;

        for (i, mut pkt) in pkts.into_iter().enumerate() {
            let head_pad = self.txpkt_hdalign(&mut pkt);
            total_len += pkt.len();
            let mut hd = TxHeader {
                len: pkt.len() as u16,
                seq: txseq,
                channel: chan as u8,
                doffset: (head_pad + self.tx_hdrlen) as u8,
                glom: self.config.txglom,
                lastfrm: i + 1 == n,
                tail_pad: 0,
            };
            txseq = txseq.wrapping_add(1);

            let mut align_pkt = None;
            if glom_chain {
                let pad = glom::tx_tail_pad(
                    pkt.len(),
                    total_len,
                    self.config.txglom_align,
                    self.blksize,
                    hd.lastfrm,
                );
                let chop = pkt.len() % self.config.txglom_align.max(4);
                if glom::needs_align_pkt(pkt.tailroom(), pad, pkt.len(), self.blksize) {
                    align_pkt = Some(glom::split_align_pkt(&mut pkt, chop, pad));
                } else {
                    pkt.put_zeroed(pad);
                }
                hd.tail_pad = pad as u16;
                total_len += pad;
            }
            hd.pack(pkt.data_mut());
            chain.push(pkt);
            if let Some(a) = align_pkt {
                chain.push(a);
            }
        }

        if self.config.txglom {
            if let Some(first) = chain.first_mut() {
                update_hwhdr(first.data_mut(), total_len as u16);
            }
        }
        chain
    }

    /// 写出一批数据帧，成功后推进发送序号
    fn txpkt(&self, inner: &mut SdioInner, pkts: Vec<SkBuff>, chan: Channel) -> Result<()> {
        let n = pkts.len();
        let chain = self.txpkt_prep(inner, pkts, chan);
        let res = self.dev().send_chain(&chain);
        inner.cnt.f2txdata += 1;
        match res {
            Ok(()) => {
                inner.tx_seq = inner.tx_seq.wrapping_add(n as u8);
                inner.cnt.tx_frames += n as u32;
                if n > 1 {
                    inner.cnt.tx_glom_frames += n as u32;
                }
                Ok(())
            }
            Err(e) => {
                self.txfail(inner);
                Err(e)
            }
        }
    }

    /// 从发送队列出队发送，最多 `maxframes` 帧；返回发出的帧数
    pub(crate) fn sendfromq(&self, inner: &mut SdioInner, maxframes: u32) -> u32 {
        let mut cnt = 0u32;
        while cnt < maxframes && data_ok(inner.tx_seq, inner.tx_max) {
            let blocked = inner.blocked_queues();
            let mut pkt_num = 1usize;
            if self.config.txglom {
                pkt_num = (inner.tx_max.wrapping_sub(inner.tx_seq) as usize)
                    .min(self.config.txglomsize.max(1) as usize);
            }
            pkt_num = pkt_num
                .min(inner.txq.len_unblocked(blocked))
                .min((maxframes - cnt) as usize);

            let mut pkts = Vec::with_capacity(pkt_num);
            while pkts.len() < pkt_num {
                match inner.txq.dequeue_masked(blocked) {
                    Some(p) => pkts.push(p),
                    None => break,
                }
            }
            if pkts.is_empty() {
                break;
            }
            let i = pkts.len() as u32;
            if let Err(e) = self.txpkt(inner, pkts, Channel::Data) {
                log::error!(target: "brcmfmac::sdio", "tx of {} frames failed: {}", i, e);
            }
            cnt += i;

            // 轮询模式下顺带检查设备中断
            if self.config.poll {
                if let Ok(status) = self.intr_rstatus(inner) {
                    if status & inner.hostintmask != 0 {
                        self.ipend.store(true, Ordering::Release);
                    }
                }
            }
        }

        if self.dev().state() == DevState::Data && inner.txoff && inner.txq.len() < TXLOW {
            inner.txoff = false;
            log::debug!(target: "brcmfmac::sdio", "tx flow unblocked");
        }
        cnt
    }

    /// 发送一个控制帧，失败时按配置次数重试
    pub(crate) fn tx_ctrlframe(&self, inner: &mut SdioInner, msg: &[u8]) -> Result<()> {
        let align = self.config.head_align.max(1);
        let mut frame = SkBuff::from_slice(msg, self.tx_hdrlen + align);
        frame.push(self.tx_hdrlen);
        let doff = frame.data_align_offset(align);
        frame.push(doff);
        frame.data_mut()[..self.tx_hdrlen + doff].fill(0);

        let len = frame.len();
        let pad = if self.blksize > 0 && len > self.blksize {
            let pad = self.blksize - len % self.blksize;
            if pad >= self.blksize {
                0
            } else {
                pad
            }
        } else if len % align != 0 {
            align - len % align
        } else {
            0
        };
        frame.put_zeroed(pad);

        let hd = TxHeader {
            len: len as u16,
            seq: inner.tx_seq,
            channel: Channel::Control as u8,
            doffset: (doff + self.tx_hdrlen) as u8,
            glom: self.config.txglom,
            lastfrm: true,
            tail_pad: pad as u16,
        };
        hd.pack(frame.data_mut());
        if self.config.txglom {
            let frame_len = frame.len() as u16;
            update_hwhdr(frame.data_mut(), frame_len);
        }

        let mut retries = 0;
        loop {
            match self.dev().send_buf(frame.data()) {
                Ok(()) => {
                    inner.tx_seq = inner.tx_seq.wrapping_add(1);
                    return Ok(());
                }
                Err(e) => {
                    self.txfail(inner);
                    if e.is_fatal() || retries >= self.config.ctrl_retries {
                        return Err(e);
                    }
                    retries += 1;
                    inner.cnt.tx_ctl_retries += 1;
                }
            }
        }
    }

    /// DPC 中发送挂起的控制帧，结果交给等待方
    pub(crate) fn service_ctrl_frame(&self, inner: &mut SdioInner) {
        if !self.ctrl_frame_stat.load(Ordering::Acquire) {
            return;
        }
        let Some(msg) = self.ctrl.lock().tx.take() else {
            self.ctrl_frame_stat.store(false, Ordering::Release);
            return;
        };
        let res = self.tx_ctrlframe(inner, &msg);
        if let Err(e) = &res {
            log::error!(target: "brcmfmac::sdio", "ctrl frame tx failed: {}", e);
        }
        self.ctrl.lock().tx_result = Some(res);
        self.ctrl_frame_stat.store(false, Ordering::Release);
    }

    /// 等待方在总线失效时直接收到错误
    pub(crate) fn fail_ctrl_frame(&self, err: Error) {
        if !self.ctrl_frame_stat.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut ctrl = self.ctrl.lock();
        ctrl.tx = None;
        ctrl.tx_result = Some(Err(err));
    }
}
