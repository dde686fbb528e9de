//! 收包
//!
//! 每帧先按上一帧给出的 nextlen 整帧预读；不知道长度时先读 [`FIRSTREAD`] 字节帧头再读余下部分。
//! 控制帧放进控制交接区，glom 描述符留给下一轮读超帧，其余帧排进交付队列，DPC 放锁后交给上层。
//!
//! 出错时终止当前帧（RF_TERM），需要设备重传时再发 NAK 并停收，直到设备回 NAKHANDLED。

use alloc::vec;

use mmc::SdioFunc;
use skb::SkBuff;

use crate::bus::{CurRead, SdioBus, SdioInner};
use crate::device::DevState;
use crate::glom;
use crate::regs::{self, f1};
use crate::sdpcm::{Channel, FrameType, HdrError, RxHeader, FIRSTREAD, HDRLEN, MAX_CTL_LEN, MAX_RX_DATASZ, NEXTLEN_UNIT};

/// 超帧校验失败时请求重传的次数
const GLOM_RETRIES: u32 = 3;
/// 终止读帧后等待设备清空计数的次数
const RF_TERM_POLLS: u32 = 0xFF;

impl<F: SdioFunc> SdioBus<F> {
    /// 终止当前帧；`rtx` 时请求设备重传
    pub(crate) fn rxfail(&self, inner: &mut SdioInner, abort: bool, rtx: bool) {
        let dev = self.dev();
        log::warn!(
            target: "brcmfmac::sdio",
            "{}terminate frame{}",
            if abort { "abort command, " } else { "" },
            if rtx { ", send NAK" } else { "" }
        );
        if abort {
            let _ = dev.abort_f2();
        }
        let _ = dev.writeb(f1::FRAMECTRL, regs::SFC_RF_TERM);
        inner.cnt.f1regdata += 1;

        let mut lastrbc = 0u16;
        let drained = bus::retry_with_interval(dev.delay(), RF_TERM_POLLS, 0, "rx frame drain", |_| {
            let hi = dev.readb(f1::RFRAMEBCHI)?;
            let lo = dev.readb(f1::RFRAMEBCLO)?;
            let rbc = u16::from_be_bytes([hi, lo]);
            if rbc == 0 {
                return Ok(bus::Poll::Ready(()));
            }
            if hi > (lastrbc >> 8) as u8 && lo > lastrbc as u8 {
                log::warn!(target: "brcmfmac::sdio", "count growing: last {:#06x} now {:#06x}", lastrbc, rbc);
            }
            lastrbc = rbc;
            Ok(bus::Poll::Pending)
        });
        inner.cnt.f1regdata += 2;
        if let Err(e) = drained {
            log::warn!(target: "brcmfmac::sdio", "rx frame not drained: {}", e);
        }

        if rtx {
            inner.cnt.rx_rtx += 1;
            if dev.core_writel(regs::core::TOSBMAILBOX, regs::SMB_NAK).is_ok() {
                inner.rxskip = true;
            }
            inner.cnt.f1regdata += 1;
        }
        inner.cur_read.len = 0;
    }

    fn count_hdr_error(&self, inner: &mut SdioInner, err: HdrError) {
        match err {
            HdrError::NoData => {}
            HdrError::Checksum => inner.cnt.checksum_errors += 1,
            HdrError::TooLong => inner.cnt.rx_toolong += 1,
            HdrError::BadLength | HdrError::BadChannel | HdrError::BadOffset => {
                inner.cnt.rx_badhdr += 1
            }
        }
    }

    /// 已解析的帧头写回读描述，并吸收流控位图与发送窗口
    pub(crate) fn apply_header(
        &self,
        inner: &mut SdioInner,
        mut rd: CurRead,
        h: &RxHeader,
        ft: FrameType,
    ) -> CurRead {
        rd.len = h.len as usize;
        rd.channel = h.channel;
        rd.dat_offset = h.doffset as usize;
        if rd.seq_num != h.seq {
            log::debug!(target: "brcmfmac::sdio", "seq {}, expected {}", h.seq, rd.seq_num);
            inner.cnt.rx_badseq += 1;
            rd.seq_num = h.seq;
        }
        if ft == FrameType::Sub {
            return rd;
        }
        rd.len_nxtfrm = h.nextlen;

        if inner.flowcontrol != h.flow {
            if !inner.flowcontrol & h.flow != 0 {
                inner.cnt.fc_xoff += 1;
            }
            if inner.flowcontrol & !h.flow != 0 {
                inner.cnt.fc_xon += 1;
            }
            inner.cnt.fc_rcvd += 1;
            inner.flowcontrol = h.flow;
        }
        let mut tx_max = h.window;
        if tx_max.wrapping_sub(inner.tx_seq) > 0x40 {
            log::error!(target: "brcmfmac::sdio", "seq {}: max tx seq number error", h.seq);
            tx_max = inner.tx_seq.wrapping_add(2);
        }
        inner.tx_max = tx_max;
        rd
    }

    /// 解析失败的统一处理；返回是否继续收
    fn header_failed(&self, inner: &mut SdioInner, err: HdrError) -> bool {
        self.count_hdr_error(inner, err);
        match err {
            HdrError::NoData => {
                inner.rxpending = false;
                return false;
            }
            // 控制响应可能就在这一帧里，要求设备重发
            HdrError::Checksum => self.rxfail(inner, true, true),
            _ => self.rxfail(inner, false, false),
        }
        inner.rxpending
    }

    /// 数据读取长度补齐：超过一块补到块整数倍，否则补到 DMA 对齐
    fn rx_pad(&self, len: usize, extra: usize, limit: usize) -> usize {
        let blksize = self.blksize;
        let align = self.config.head_align.max(1);
        if blksize > 0 && len > blksize {
            let pad = blksize - len % blksize;
            if pad < blksize && len + pad + extra < limit {
                return len + pad;
            }
            len
        } else if len % align != 0 {
            len + align - len % align
        } else {
            len
        }
    }

    /// 读控制帧余下部分，负载放进交接区
    fn read_control(&self, inner: &mut SdioInner, head: &[u8], len: usize, doff: usize) {
        let frame = if len <= FIRSTREAD {
            head[..len].to_vec()
        } else {
            let rdlen = self.rx_pad(len - FIRSTREAD, FIRSTREAD, MAX_CTL_LEN);
            if rdlen + FIRSTREAD > MAX_CTL_LEN {
                log::error!(target: "brcmfmac::sdio", "{}-byte control read exceeds {}-byte buffer", rdlen, MAX_CTL_LEN);
                self.rxfail(inner, false, false);
                return;
            }
            if len - doff > MAX_CTL_LEN {
                log::error!(target: "brcmfmac::sdio", "{}-byte control frame too long", len - doff);
                inner.cnt.rx_toolong += 1;
                self.rxfail(inner, false, false);
                return;
            }
            let mut buf = vec![0u8; FIRSTREAD + rdlen];
            buf[..FIRSTREAD].copy_from_slice(&head[..FIRSTREAD]);
            let res = self.dev().recv_buf(&mut buf[FIRSTREAD..]);
            inner.cnt.f2rxdata += 1;
            if let Err(e) = res {
                log::error!(target: "brcmfmac::sdio", "read {} control bytes failed: {}", rdlen, e);
                inner.cnt.rxc_errors += 1;
                self.rxfail(inner, true, true);
                return;
            }
            buf.truncate(len);
            buf
        };

        let mut ctrl = self.ctrl.lock();
        if ctrl.rx.is_some() {
            log::error!(target: "brcmfmac::sdio", "last control frame is being processed");
            return;
        }
        ctrl.rx = Some(frame[doff..].to_vec());
    }

    /// 按通道排进交付队列
    fn deliver(&self, inner: &mut SdioInner, channel: u8, skb: SkBuff) {
        if skb.is_empty() {
            return;
        }
        match Channel::from_raw(channel) {
            Some(Channel::Data) | Some(Channel::Event) => {
                inner.cnt.rx_frames += 1;
                inner.rx_deliver.push((channel, skb));
            }
            _ => log::warn!(target: "brcmfmac::sdio", "drop frame on channel {}", channel),
        }
    }

    /// 下一帧长度按 nextlen 预设，未知帧先当事件处理
    fn prepare_next_read(inner: &mut SdioInner) {
        inner.cur_read.len = inner.cur_read.len_nxtfrm;
        inner.cur_read.len_nxtfrm = 0;
        inner.cur_read.channel = Channel::Event as u8;
    }

    /// 读一帧；返回 false 表示设备已无数据
    fn read_one(&self, inner: &mut SdioInner) -> bool {
        let dev = self.dev();
        let mut head = [0u8; FIRSTREAD];
        let mut head_read = 0;
        let mut len_left = inner.cur_read.len;
        let mut glomdesc = false;

        if inner.cur_read.len == 0 {
            let res = dev.recv_buf(&mut head);
            inner.cnt.f2rxhdrs += 1;
            if let Err(e) = res {
                log::error!(target: "brcmfmac::sdio", "rx header failed: {}", e);
                inner.cnt.rx_hdrfail += 1;
                self.rxfail(inner, true, true);
                return true;
            }
            let h = match RxHeader::parse(&head, FrameType::Normal, FIRSTREAD, self.blksize) {
                Ok(h) => h,
                Err(e) => return self.header_failed(inner, e),
            };
            let rd = inner.cur_read;
            inner.cur_read = self.apply_header(inner, rd, &h, FrameType::Normal);
            glomdesc = h.glomdesc;

            if h.channel == Channel::Control as u8 {
                let (len, doff) = (inner.cur_read.len, inner.cur_read.dat_offset);
                self.read_control(inner, &head, len, doff);
                Self::prepare_next_read(inner);
                return true;
            }
            len_left = inner.cur_read.len.saturating_sub(FIRSTREAD);
            head_read = FIRSTREAD;
        }

        let rdlen = if len_left == 0 {
            0
        } else {
            self.rx_pad(len_left, FIRSTREAD, MAX_RX_DATASZ)
        };
        let mut pkt = SkBuff::alloc(head_read + rdlen);
        pkt.put_zeroed(head_read + rdlen);
        if rdlen > 0 {
            let res = dev.recv_buf(&mut pkt.data_mut()[head_read..]);
            inner.cnt.f2rxdata += 1;
            if let Err(e) = res {
                log::error!(
                    target: "brcmfmac::sdio",
                    "read {} bytes from channel {} failed: {}",
                    inner.cur_read.len,
                    inner.cur_read.channel,
                    e
                );
                let rtx = Channel::wants_retransmit(inner.cur_read.channel);
                self.rxfail(inner, true, rtx);
                return true;
            }
        }

        if head_read > 0 {
            pkt.data_mut()[..head_read].copy_from_slice(&head);
        } else {
            // 按 nextlen 整帧预读：帧头在包里
            let h = match RxHeader::parse(pkt.data(), FrameType::Normal, pkt.len(), self.blksize) {
                Ok(h) => h,
                Err(e) => {
                    self.count_hdr_error(inner, e);
                    self.rxfail(inner, true, true);
                    return true;
                }
            };
            inner.cnt.rx_readahead += 1;
            let rd = CurRead {
                seq_num: inner.cur_read.seq_num,
                ..CurRead::default()
            };
            let rd_new = self.apply_header(inner, rd, &h, FrameType::Normal);
            if inner.cur_read.len != rd_new.len.next_multiple_of(NEXTLEN_UNIT) {
                log::error!(
                    target: "brcmfmac::sdio",
                    "readahead length mismatch: nextlen {} frame {}",
                    inner.cur_read.len,
                    rd_new.len
                );
                inner.cnt.rx_readahead_mismatch += 1;
                self.rxfail(inner, true, true);
                return true;
            }
            inner.cur_read.seq_num = rd_new.seq_num;
            inner.cur_read.len_nxtfrm = rd_new.len_nxtfrm;
            inner.cur_read.channel = rd_new.channel;
            inner.cur_read.dat_offset = rd_new.dat_offset;
            glomdesc = h.glomdesc;

            if rd_new.channel == Channel::Control as u8 {
                log::error!(target: "brcmfmac::sdio", "readahead on control packet {}", rd_new.seq_num);
                self.rxfail(inner, false, true);
                return true;
            }
            inner.cur_read.len = rd_new.len;
        }

        if inner.cur_read.channel == Channel::Glom as u8 {
            if glomdesc {
                pkt.trim(inner.cur_read.len);
                pkt.pull(HDRLEN);
                log::debug!(target: "brcmfmac::sdio", "glom descriptor, {} bytes", pkt.len());
                inner.cnt.rx_glom_descs += 1;
                inner.glomd = Some(pkt);
            } else {
                log::error!(target: "brcmfmac::sdio", "glom superframe without descriptor");
                self.rxfail(inner, false, false);
            }
            Self::prepare_next_read(inner);
            return true;
        }

        pkt.trim(inner.cur_read.len);
        pkt.pull(inner.cur_read.dat_offset);
        let channel = inner.cur_read.channel;
        self.deliver(inner, channel, pkt);
        Self::prepare_next_read(inner);
        true
    }

    /// 读一条聚合链；返回消耗的序号数
    fn rxglom(&self, inner: &mut SdioInner, rxseq: u8) -> u8 {
        let dev = self.dev();
        if let Some(desc) = inner.glomd.take() {
            match glom::plan(desc.data(), self.blksize) {
                Ok(plan) => {
                    if inner.cur_read.len != 0 && plan.total != inner.cur_read.len {
                        log::debug!(
                            target: "brcmfmac::sdio",
                            "glomdesc mismatch: nextlen {} glomdesc {} rxseq {}",
                            inner.cur_read.len,
                            plan.total,
                            rxseq
                        );
                    }
                    inner.glom = Some(plan);
                }
                Err(e) => {
                    log::error!(target: "brcmfmac::sdio", "bad glom descriptor: {:?}", e);
                    inner.cnt.rx_glomfail += 1;
                    inner.glom = None;
                }
            }
            inner.cur_read.len = 0;
        }
        let Some(plan) = inner.glom.clone() else {
            return 0;
        };

        let mut chain = glom::alloc_chain(&plan);
        let res = dev.recv_chain(&mut chain);
        inner.cnt.f2rxdata += 1;
        if let Err(e) = res {
            log::error!(target: "brcmfmac::sdio", "glom read of {} bytes failed: {}", plan.total, e);
            self.rxfail(inner, true, false);
            inner.cnt.rx_glomfail += 1;
            inner.glom = None;
            return 0;
        }

        let hdrs = match glom::validate_chain(&mut chain, self.blksize) {
            Ok(h) => h,
            Err(e) => {
                log::error!(target: "brcmfmac::sdio", "glom chain invalid: {:?}", e);
                self.count_hdr_error(inner, e);
                if inner.glomerr < GLOM_RETRIES {
                    inner.glomerr += 1;
                    self.rxfail(inner, true, true);
                } else {
                    inner.glomerr = 0;
                    self.rxfail(inner, true, false);
                    inner.cnt.rx_glomfail += 1;
                    inner.glom = None;
                }
                return 0;
            }
        };
        inner.glomerr = 0;
        inner.glom = None;

        let rd = CurRead {
            seq_num: rxseq,
            ..CurRead::default()
        };
        let rd = self.apply_header(inner, rd, &hdrs.superframe, FrameType::Super);
        inner.cur_read.len = rd.len_nxtfrm;

        let mut seq = rd.seq_num;
        for sub in &hdrs.subframes {
            if sub.seq != seq {
                log::debug!(target: "brcmfmac::sdio", "glom seq {}, expected {}", sub.seq, seq);
                inner.cnt.rx_badseq += 1;
                seq = sub.seq;
            }
            seq = seq.wrapping_add(1);
        }

        let num = hdrs.subframes.len();
        for (channel, skb) in glom::unpack_chain(chain, &hdrs.subframes) {
            self.deliver(inner, channel, skb);
        }
        inner.cnt.rx_glom_frames += num as u32;
        num as u8
    }

    /// 最多读 `maxframes` 帧；返回处理的帧数
    pub(crate) fn readframes(&self, inner: &mut SdioInner, maxframes: u32) -> u32 {
        inner.rxpending = true;
        inner.cur_read.seq_num = inner.rx_seq;
        let mut rxleft = maxframes;

        while !inner.rxskip && rxleft > 0 && self.dev().state() == DevState::Data {
            if inner.glomd.is_some() || inner.glom.is_some() {
                let seq = inner.cur_read.seq_num;
                let mut cnt = self.rxglom(inner, seq);
                // 等待重传时按一帧计，与下面的回退配对
                if inner.rxskip {
                    cnt = cnt.max(1);
                }
                inner.cur_read.seq_num = seq.wrapping_add(cnt).wrapping_sub(1);
                rxleft = if rxleft > cnt as u32 { rxleft - cnt as u32 } else { 1 };
            } else if !self.read_one(inner) {
                break;
            }
            inner.cur_read.seq_num = inner.cur_read.seq_num.wrapping_add(1);
            rxleft -= 1;
        }

        let rxcount = maxframes - rxleft;
        if rxleft == 0 {
            log::debug!(target: "brcmfmac::sdio", "hit rx limit of {} frames", maxframes);
        } else {
            log::trace!(target: "brcmfmac::sdio", "processed {} frames", rxcount);
        }
        if inner.rxskip {
            inner.cur_read.seq_num = inner.cur_read.seq_num.wrapping_sub(1);
        }
        inner.rx_seq = inner.cur_read.seq_num;
        rxcount
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SdioConfig;
    use crate::mock::MockChip;

    #[test]
    fn pad_rounds_to_block_or_alignment() {
        let mock = MockChip::new();
        let bus = mock.bus(SdioConfig::default());
        assert_eq!(bus.rx_pad(600, 64, 2048), 1024);
        assert_eq!(bus.rx_pad(203, 64, 2048), 204);
        // 补齐后超限则不补
        assert_eq!(bus.rx_pad(2000, 64, 2048), 2000);
    }
}
