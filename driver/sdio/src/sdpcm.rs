//! SDPCM 帧头
//!
//! ```text
//! 硬件头 4B   : len(u16) | !len(u16)
//! 聚合扩展 8B : (len-4) | lastfrm<<24 ; tail_pad<<16      （仅 txglom 发送）
//! 软件头 8B   : seq | chan<<8 | glomdesc(bit15) | nextlen<<16 | doffset<<24 ; flow | window<<8
//! ```
//!
//! 全部小端。

use bus::HexPrefix;

pub const HW_HDRLEN: usize = 4;
pub const SW_HDRLEN: usize = 8;
pub const HDRLEN: usize = HW_HDRLEN + SW_HDRLEN;
/// 发送聚合扩展头
pub const HWEXT_LEN: usize = 8;
/// 首次读取长度：一般足够容纳整个小帧
pub const FIRSTREAD: usize = 64;
/// 非控制帧最大长度
pub const MAX_RX_DATASZ: usize = 2048;
/// 控制帧最大长度
pub const MAX_CTL_LEN: usize = 8192 + FIRSTREAD;
/// nextlen 的单位
pub const NEXTLEN_UNIT: usize = 16;
/// 序号空间
pub const SEQ_WRAP: u32 = 256;

const CHANNEL_SHIFT: u32 = 8;
const CHANNEL_MASK: u32 = 0x0000_0F00;
const GLOMDESC_FLAG: u32 = 0x8000;
const NEXTLEN_SHIFT: u32 = 16;
const NEXTLEN_MASK: u32 = 0x00FF_0000;
const DOFFSET_SHIFT: u32 = 24;
const FCMASK_MASK: u32 = 0x0000_00FF;
const WINDOW_SHIFT: u32 = 8;
const WINDOW_MASK: u32 = 0x0000_FF00;

const GLOM_LASTFRM: u32 = 1 << 24;
const GLOM_PADLEN_SHIFT: u32 = 16;

/// SDPCM 通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Control = 0,
    Event = 1,
    Data = 2,
    Glom = 3,
    Test = 15,
}

impl Channel {
    pub fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Control),
            1 => Some(Self::Event),
            2 => Some(Self::Data),
            3 => Some(Self::Glom),
            15 => Some(Self::Test),
            _ => None,
        }
    }

    /// 出错时需要设备重传的通道
    pub fn wants_retransmit(raw: u8) -> bool {
        raw == Self::Control as u8
    }
}

/// 帧类型决定解析时的长度校验方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Normal,
    /// 聚合超帧：长度按块大小取整后应等于实际读取长度
    Super,
    /// 超帧内的子帧：长度不超过描述符给出的长度
    Sub,
}

/// 发送帧头参数
#[derive(Debug, Clone, Copy, Default)]
pub struct TxHeader {
    /// 帧总长（含所有头）
    pub len: u16,
    pub seq: u8,
    pub channel: u8,
    /// 数据偏移（从帧首起算）
    pub doffset: u8,
    /// 聚合模式：写入扩展头
    pub glom: bool,
    pub lastfrm: bool,
    pub tail_pad: u16,
}

impl TxHeader {
    /// 头部总长
    pub fn hdrlen(glom: bool) -> usize {
        if glom {
            HDRLEN + HWEXT_LEN
        } else {
            HDRLEN
        }
    }

    /// 写入 `buf` 开头；`len` 不短于硬件头，否则扩展头长度记为 0
    pub fn pack(&self, buf: &mut [u8]) {
        let len = self.len as u32;
        put_le32(buf, 0, len | ((!len & 0xFFFF) << 16));
        let mut off = HW_HDRLEN;
        if self.glom {
            let lastfrm = if self.lastfrm { GLOM_LASTFRM } else { 0 };
            put_le32(buf, off, len.saturating_sub(HW_HDRLEN as u32) | lastfrm);
            put_le32(buf, off + 4, (self.tail_pad as u32) << GLOM_PADLEN_SHIFT);
            off += HWEXT_LEN;
        }
        let sw = self.seq as u32
            | ((self.channel as u32) << CHANNEL_SHIFT & CHANNEL_MASK)
            | ((self.doffset as u32) << DOFFSET_SHIFT);
        put_le32(buf, off, sw);
        put_le32(buf, off + 4, 0);
    }
}

/// 只改写硬件长度与校验（聚合链首帧改为整链长度）
pub fn update_hwhdr(buf: &mut [u8], len: u16) {
    let len = len as u32;
    put_le32(buf, 0, len | ((!len & 0xFFFF) << 16));
}

/// 解析错误；除 NoData 外都要中止当前读并计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrError {
    /// len 与校验均为 0：设备没有更多数据
    NoData,
    Checksum,
    /// 长度过短或与帧类型不一致
    BadLength,
    TooLong,
    BadChannel,
    BadOffset,
}

/// 收包头
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxHeader {
    pub len: u16,
    pub seq: u8,
    pub channel: u8,
    pub glomdesc: bool,
    /// 下一帧长度提示（字节，已乘 16；0 表示无）
    pub nextlen: usize,
    pub doffset: u8,
    pub flow: u8,
    pub window: u8,
}

impl RxHeader {
    /// 解析 `buf` 开头的硬件头与软件头；`rd_len` 为本次实际读取长度，超帧时配合 `blksize` 校验
    pub fn parse(
        buf: &[u8],
        ft: FrameType,
        rd_len: usize,
        blksize: usize,
    ) -> Result<Self, HdrError> {
        if buf.len() < HDRLEN {
            return Err(HdrError::BadLength);
        }
        let len = u16::from_le_bytes([buf[0], buf[1]]);
        let chk = u16::from_le_bytes([buf[2], buf[3]]);
        if len == 0 && chk == 0 {
            return Err(HdrError::NoData);
        }
        if len ^ chk != 0xFFFF {
            log::warn!(target: "brcmfmac::sdio", "HW hdr error: len/chk {:#06x}/{:#06x}", len, chk);
            log::trace!(target: "brcmfmac::sdio", "hdr: {}", HexPrefix(&buf[..HDRLEN]));
            return Err(HdrError::Checksum);
        }
        let ulen = len as usize;
        if ulen < HDRLEN {
            return Err(HdrError::BadLength);
        }
        match ft {
            FrameType::Super if ulen.div_ceil(blksize.max(1)) * blksize.max(1) != rd_len => {
                return Err(HdrError::BadLength)
            }
            FrameType::Sub if ulen > rd_len => return Err(HdrError::BadLength),
            _ => {}
        }

        let sw0 = get_le32(buf, HW_HDRLEN);
        let sw1 = get_le32(buf, HW_HDRLEN + 4);
        let channel = ((sw0 & CHANNEL_MASK) >> CHANNEL_SHIFT) as u8;
        if ulen > MAX_RX_DATASZ && channel != Channel::Control as u8 && ft != FrameType::Super {
            return Err(HdrError::TooLong);
        }
        match ft {
            FrameType::Super if channel != Channel::Glom as u8 => return Err(HdrError::BadChannel),
            FrameType::Sub
                if channel != Channel::Data as u8 && channel != Channel::Event as u8 =>
            {
                return Err(HdrError::BadChannel)
            }
            _ => {}
        }
        let doffset = (sw0 >> DOFFSET_SHIFT) as u8;
        if (doffset as usize) < HDRLEN || doffset as usize > ulen {
            return Err(HdrError::BadOffset);
        }
        let mut nextlen = (((sw0 & NEXTLEN_MASK) >> NEXTLEN_SHIFT) as usize) * NEXTLEN_UNIT;
        if nextlen > MAX_RX_DATASZ {
            if channel != Channel::Glom as u8 {
                log::warn!(target: "brcmfmac::sdio", "next length {} out of range", nextlen);
            }
            nextlen = 0;
        }
        Ok(Self {
            len,
            seq: sw0 as u8,
            channel,
            glomdesc: sw0 & GLOMDESC_FLAG != 0,
            nextlen,
            doffset,
            flow: (sw1 & FCMASK_MASK) as u8,
            window: ((sw1 & WINDOW_MASK) >> WINDOW_SHIFT) as u8,
        })
    }
}

/// 发送窗口是否允许再发一帧
#[inline]
pub fn data_ok(tx_seq: u8, tx_max: u8) -> bool {
    let d = tx_max.wrapping_sub(tx_seq);
    d != 0 && d & 0x80 == 0
}

/// 剩余可发帧数
#[inline]
pub fn txwindow(tx_seq: u8, tx_max: u8) -> u8 {
    if data_ok(tx_seq, tx_max) {
        tx_max.wrapping_sub(tx_seq)
    } else {
        0
    }
}

#[inline]
pub(crate) fn get_le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
pub(crate) fn put_le32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// 设备侧写出的收包头（测试与模拟用）
#[cfg(test)]
pub(crate) fn pack_rx(buf: &mut [u8], h: &RxHeader) {
    let len = h.len as u32;
    put_le32(buf, 0, len | ((!len & 0xFFFF) << 16));
    let sw0 = h.seq as u32
        | ((h.channel as u32) << CHANNEL_SHIFT)
        | if h.glomdesc { GLOMDESC_FLAG } else { 0 }
        | (((h.nextlen / NEXTLEN_UNIT) as u32) << NEXTLEN_SHIFT)
        | ((h.doffset as u32) << DOFFSET_SHIFT);
    put_le32(buf, HW_HDRLEN, sw0);
    put_le32(buf, HW_HDRLEN + 4, h.flow as u32 | ((h.window as u32) << WINDOW_SHIFT));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_pack_then_parse() {
        let mut buf = [0u8; 64];
        let h = TxHeader {
            len: 40,
            seq: 7,
            channel: Channel::Data as u8,
            doffset: HDRLEN as u8,
            ..Default::default()
        };
        h.pack(&mut buf);
        let r = RxHeader::parse(&buf, FrameType::Normal, 64, 512).unwrap();
        assert_eq!(r.len, 40);
        assert_eq!(r.seq, 7);
        assert_eq!(r.channel, Channel::Data as u8);
        assert_eq!(r.doffset as usize, HDRLEN);
        assert!(!r.glomdesc);
    }

    #[test]
    fn checksum_bit_flip_is_detected() {
        let mut buf = [0u8; 32];
        let h = RxHeader {
            len: 20,
            seq: 3,
            channel: Channel::Event as u8,
            doffset: 12,
            ..Default::default()
        };
        pack_rx(&mut buf, &h);
        assert_eq!(RxHeader::parse(&buf, FrameType::Normal, 32, 512), Ok(h));
        buf[2] ^= 0x10;
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Normal, 32, 512),
            Err(HdrError::Checksum)
        );
    }

    #[test]
    fn empty_header_means_no_data() {
        let buf = [0u8; 16];
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Normal, 16, 512),
            Err(HdrError::NoData)
        );
    }

    #[test]
    fn offset_and_type_checks() {
        let mut buf = [0u8; 32];
        let mut h = RxHeader {
            len: 20,
            channel: Channel::Data as u8,
            doffset: 8,
            ..Default::default()
        };
        pack_rx(&mut buf, &h);
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Normal, 32, 512),
            Err(HdrError::BadOffset)
        );

        h.doffset = 12;
        pack_rx(&mut buf, &h);
        // 子帧长度超过描述符
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Sub, 16, 512),
            Err(HdrError::BadLength)
        );
        // 超帧必须在 glom 通道
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Super, 512, 512),
            Err(HdrError::BadChannel)
        );
        h.channel = Channel::Glom as u8;
        pack_rx(&mut buf, &h);
        assert!(RxHeader::parse(&buf, FrameType::Super, 512, 512).is_ok());
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Super, 1024, 512),
            Err(HdrError::BadLength)
        );
    }

    #[test]
    fn glom_ext_header_layout() {
        let mut buf = [0u8; 32];
        TxHeader {
            len: 100,
            seq: 1,
            channel: Channel::Data as u8,
            doffset: 20,
            glom: true,
            lastfrm: true,
            tail_pad: 3,
        }
        .pack(&mut buf);
        assert_eq!(get_le32(&buf, 4), 96 | GLOM_LASTFRM);
        assert_eq!(get_le32(&buf, 8), 3 << 16);
        assert_eq!(get_le32(&buf, 12) >> 24, 20);
        update_hwhdr(&mut buf, 300);
        assert_eq!(get_le32(&buf, 0), 300 | ((!300u32 & 0xFFFF) << 16));
    }

    #[test]
    fn degenerate_lengths_do_not_panic() {
        let mut buf = [0u8; 32];
        let h = RxHeader {
            len: 20,
            channel: Channel::Glom as u8,
            doffset: 12,
            ..Default::default()
        };
        pack_rx(&mut buf, &h);
        // 块大小为 0 时按 1 字节块处理
        assert_eq!(RxHeader::parse(&buf, FrameType::Super, 20, 0), Ok(h));
        assert_eq!(
            RxHeader::parse(&buf, FrameType::Super, 32, 0),
            Err(HdrError::BadLength)
        );

        TxHeader {
            len: 2,
            glom: true,
            ..Default::default()
        }
        .pack(&mut buf);
        assert_eq!(get_le32(&buf, 4), 0);
    }

    #[test]
    fn window_arithmetic_wraps() {
        assert!(data_ok(255, 0));
        assert!(!data_ok(5, 5));
        assert!(!data_ok(0, 0x80));
        assert_eq!(txwindow(250, 4), 10);
        assert_eq!(txwindow(4, 250), 0);
    }
}
