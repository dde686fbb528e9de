//! 聚合（glom）收发
//!
//! 收：设备先发一个描述符帧（glom 通道，glomdesc 置位），负载为 u16 子帧长度列表；
//! 首个长度包含超帧头。按列表为每个子帧分配缓冲（末个补齐到块大小），一次读完整条链，
//! 再逐个校验子帧头。任何一个子帧不合法则整条链丢弃，不做部分交付。
//!
//! 发：每个子帧尾部补齐到 sg 对齐，末帧再补到块大小整数倍；原地补齐放不下且帧长超过一块时，
//! 把尾部零头切出来放进单独的对齐包。

use alloc::vec::Vec;

use skb::SkBuff;

use crate::sdpcm::{FrameType, HdrError, RxHeader, HDRLEN};

/// 描述符错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlomError {
    /// 描述符为空或长度为奇数
    BadDescriptor,
    /// 第 `index` 个子帧长度低于下限
    ShortSubframe { index: usize, len: usize },
}

/// 一条聚合链的读取计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlomPlan {
    /// 每个缓冲的读取长度；末项已补齐
    pub lens: Vec<usize>,
    /// 总读取长度（块大小整数倍）
    pub total: usize,
}

/// 按描述符生成读取计划
pub fn plan(desc: &[u8], blksize: usize) -> Result<GlomPlan, GlomError> {
    if desc.is_empty() || desc.len() % 2 != 0 {
        return Err(GlomError::BadDescriptor);
    }
    let mut lens = Vec::with_capacity(desc.len() / 2);
    let mut total = 0;
    for (index, pair) in desc.chunks_exact(2).enumerate() {
        let len = u16::from_le_bytes([pair[0], pair[1]]) as usize;
        if len < HDRLEN || (index == 0 && len < 2 * HDRLEN) {
            return Err(GlomError::ShortSubframe { index, len });
        }
        total += len;
        lens.push(len);
    }
    let rounded = total.div_ceil(blksize.max(1)) * blksize.max(1);
    if let Some(last) = lens.last_mut() {
        *last += rounded - total;
    }
    Ok(GlomPlan {
        lens,
        total: rounded,
    })
}

/// 为计划分配缓冲，长度已设好，等待一次链式读取填充
pub fn alloc_chain(plan: &GlomPlan) -> Vec<SkBuff> {
    plan.lens
        .iter()
        .map(|&len| {
            let mut skb = SkBuff::alloc(len);
            skb.set_len(len);
            skb
        })
        .collect()
}

/// 链校验结果：超帧头与每个子帧头
#[derive(Debug, Clone)]
pub struct ChainHeaders {
    pub superframe: RxHeader,
    pub subframes: Vec<RxHeader>,
}

/// 校验整条链：首缓冲开头为超帧头，校验后剥掉；随后每个缓冲开头为子帧头
pub fn validate_chain(chain: &mut [SkBuff], blksize: usize) -> Result<ChainHeaders, HdrError> {
    let total: usize = chain.iter().map(SkBuff::len).sum();
    let first = chain.first_mut().ok_or(HdrError::BadLength)?;
    let superframe = RxHeader::parse(first.data(), FrameType::Super, total, blksize)?;
    first.pull(superframe.doffset as usize);

    let mut subframes = Vec::with_capacity(chain.len());
    for skb in chain.iter() {
        let sub = RxHeader::parse(skb.data(), FrameType::Sub, skb.len(), blksize)?;
        subframes.push(sub);
    }
    Ok(ChainHeaders {
        superframe,
        subframes,
    })
}

/// 把已校验的链拆成 (通道, 负载)；空负载子帧丢弃
pub fn unpack_chain(chain: Vec<SkBuff>, headers: &[RxHeader]) -> Vec<(u8, SkBuff)> {
    chain
        .into_iter()
        .zip(headers)
        .filter_map(|(mut skb, h)| {
            skb.trim(h.len as usize);
            skb.pull(h.doffset as usize);
            if skb.is_empty() {
                None
            } else {
                Some((h.channel, skb))
            }
        })
        .collect()
}

/// 发送子帧尾部补齐量
///
/// `total_len` 为含本帧在内的链累计长度。非末帧只对齐到 `sg_align`，末帧对齐后再补到块大小整数倍。
pub fn tx_tail_pad(pkt_len: usize, total_len: usize, sg_align: usize, blksize: usize, last: bool) -> usize {
    let sg_align = sg_align.max(4);
    let chop = pkt_len % sg_align;
    let mut pad = if chop == 0 { 0 } else { sg_align - chop };
    if last {
        let rem = (total_len + pad) % blksize;
        if rem != 0 {
            pad += blksize - rem;
        }
    }
    pad
}

/// 原地补齐放不下时需要切出对齐包
#[inline]
pub fn needs_align_pkt(tailroom: usize, pad: usize, pkt_len: usize, blksize: usize) -> bool {
    tailroom < pad && pkt_len > blksize
}

/// 切出尾部 `chop` 字节并补 `pad` 个零，作为紧随其后的对齐包
pub fn split_align_pkt(pkt: &mut SkBuff, chop: usize, pad: usize) -> SkBuff {
    let keep = pkt.len() - chop;
    let mut tail = SkBuff::alloc(chop + pad);
    if let Some(dst) = tail.put(chop) {
        dst.copy_from_slice(&pkt.data()[keep..]);
    }
    tail.put_zeroed(pad);
    pkt.trim(keep);
    tail
}
