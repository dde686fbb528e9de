//! 模拟 SDIO 设备：F0/F1 寄存器、背板与 RAM、F2 帧收发
//!
//! 芯片按 4329（SB 背板）布置。设备侧收到控制帧后立即回一个响应帧，并把发送窗口推到序号 + 9。

use std::boxed::Box;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec;
use std::vec::Vec;

use bus::{BusState, BusStateObserver, Delay, RxHandler};
use chip::regs::{cc, chip_id, sb, socram, SI_ENUM_BASE_DEFAULT};
use mmc::{SdioFunc, SDIO_CCCR_INT_PENDING};
use skb::SkBuff;

use crate::bus::SdioBus;
use crate::config::SdioConfig;
use crate::device::SdioDev;
use crate::regs::{self, f1, hmb, int};
use crate::sdpcm::{get_le32, pack_rx, Channel, RxHeader, HDRLEN, HW_HDRLEN, HWEXT_LEN};

pub const SDIO_CORE_BASE: u32 = 0x1801_1000;
const SOCRAM_BASE: u32 = 0x1800_3000;
/// 3 个 bank：128K + 128K + 64K
pub const RAM_SIZE: usize = 0x50000;
const BANKS: [u32; 3] = [0x0F, 0x0F, 0x07];
const EINVAL: i32 = -22;

/// 设备收到的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub channel: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub struct Sim {
    pub ram: Vec<u8>,
    pub regs: BTreeMap<u32, u32>,
    f1regs: BTreeMap<u32, u8>,
    f0regs: BTreeMap<u8, u8>,
    pub sbaddrlow_writes: u32,
    /// 置位后所有访问返回该错误码
    pub fail_all: Option<i32>,
    /// HT 请求后还要读多少次 CLKCSR 才可用
    pub ht_stall: u32,
    pub intstatus: u32,
    pub hostintmask: u32,
    pub tohost_mailbox: u32,
    pub naks: u32,
    pub rf_terms: u32,
    pub rx_queue: VecDeque<Vec<u8>>,
    cur: Option<(Vec<u8>, usize)>,
    last_clean: Option<Vec<u8>>,
    /// 下一个出队的帧翻转校验位，重传时给干净副本
    pub corrupt_next: bool,
    pub txglom: bool,
    pub dev_seq: u8,
    pub sent: Vec<SentFrame>,
    pub responder: Option<Responder>,
    pub f2_enabled: bool,
    blksize: [u16; 3],
}

impl Sim {
    fn new() -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(SI_ENUM_BASE_DEFAULT + cc::CHIPID, 0x0001_0000 | chip_id::BCM4329);
        regs.insert(SOCRAM_BASE + sb::SBIDHIGH, 0x8);
        regs.insert(SOCRAM_BASE + socram::COREINFO, 3 << socram::SRCI_SRNB_SHIFT);
        Self {
            ram: vec![0; RAM_SIZE],
            regs,
            f1regs: BTreeMap::new(),
            f0regs: BTreeMap::new(),
            sbaddrlow_writes: 0,
            fail_all: None,
            ht_stall: 0,
            intstatus: 0,
            hostintmask: 0,
            tohost_mailbox: 0,
            naks: 0,
            rf_terms: 0,
            rx_queue: VecDeque::new(),
            cur: None,
            last_clean: None,
            corrupt_next: false,
            txglom: false,
            dev_seq: 0,
            sent: Vec::new(),
            responder: None,
            f2_enabled: false,
            blksize: [0; 3],
        }
    }

    fn window(&self) -> u32 {
        let b = |r| self.f1regs.get(&r).copied().unwrap_or(0) as u32;
        (b(f1::SBADDRHIGH) << 24) | (b(f1::SBADDRMID) << 16) | (b(f1::SBADDRLOW) << 8)
    }

    pub fn f1reg(&self, addr: u32) -> u8 {
        self.f1regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn f0reg(&self, reg: u8) -> u8 {
        self.f0regs.get(&reg).copied().unwrap_or(0)
    }

    /// 设备排入一帧待主机读取
    pub fn push_rx(&mut self, frame: Vec<u8>) {
        self.rx_queue.push_back(frame);
        self.intstatus |= int::HMB_FRAME_IND;
    }

    /// 设备发出邮箱消息
    pub fn mailbox(&mut self, data: u32) {
        self.tohost_mailbox |= data;
        self.intstatus |= int::HMB_HOST_INT;
    }

    fn bp_read32(&self, addr: u32) -> u32 {
        let a = addr as usize;
        if a + 4 <= RAM_SIZE {
            return u32::from_le_bytes([self.ram[a], self.ram[a + 1], self.ram[a + 2], self.ram[a + 3]]);
        }
        match addr {
            _ if addr == SOCRAM_BASE + socram::BANKINFO => {
                let idx = (self.regs.get(&(SOCRAM_BASE + socram::BANKIDX)).copied().unwrap_or(0) & 0xFF) as usize;
                BANKS.get(idx).copied().unwrap_or(0)
            }
            _ if addr == SDIO_CORE_BASE + regs::core::INTSTATUS => self.intstatus,
            _ if addr == SDIO_CORE_BASE + regs::core::TOHOSTMAILBOXDATA => self.tohost_mailbox,
            _ => self.regs.get(&addr).copied().unwrap_or(0),
        }
    }

    fn bp_write32(&mut self, addr: u32, val: u32) {
        let a = addr as usize;
        if a + 4 <= RAM_SIZE {
            self.ram[a..a + 4].copy_from_slice(&val.to_le_bytes());
            return;
        }
        if addr == SDIO_CORE_BASE + regs::core::INTSTATUS {
            self.intstatus &= !val;
            if !self.rx_queue.is_empty() {
                self.intstatus |= int::HMB_FRAME_IND;
            }
            return;
        }
        if addr == SDIO_CORE_BASE + regs::core::HOSTINTMASK {
            self.hostintmask = val;
        }
        if addr == SDIO_CORE_BASE + regs::core::TOSBMAILBOX {
            if val & regs::SMB_NAK != 0 {
                self.naks += 1;
                if let Some(f) = self.last_clean.take() {
                    self.rx_queue.push_front(f);
                    self.intstatus |= int::HMB_FRAME_IND;
                }
                self.mailbox(hmb::NAKHANDLED);
            }
            if val & regs::SMB_INT_ACK != 0 {
                self.tohost_mailbox = 0;
            }
            return;
        }
        self.regs.insert(addr, val);
    }

    fn f1_readb(&mut self, addr: u32) -> u8 {
        match addr {
            f1::CHIPCLKCSR => {
                let req = self.f1reg(addr);
                let mut out = req;
                if req & (regs::ALP_AVAIL_REQ | regs::FORCE_ALP | regs::HT_AVAIL_REQ | regs::FORCE_HT) != 0 {
                    out |= regs::ALP_AVAIL;
                }
                if req & (regs::HT_AVAIL_REQ | regs::FORCE_HT) != 0 {
                    if self.ht_stall > 0 {
                        self.ht_stall -= 1;
                    } else {
                        out |= regs::HT_AVAIL;
                    }
                }
                out
            }
            f1::SLEEPCSR => {
                let v = self.f1reg(addr);
                if v & regs::SLEEPCSR_KSO_MASK != 0 {
                    v | regs::SLEEPCSR_DEVON_MASK
                } else {
                    v
                }
            }
            f1::RFRAMEBCLO | f1::RFRAMEBCHI | f1::WFRAMEBCLO | f1::WFRAMEBCHI => 0,
            _ => self.f1reg(addr),
        }
    }

    fn f1_writeb(&mut self, addr: u32, val: u8) {
        match addr {
            f1::SBADDRLOW => self.sbaddrlow_writes += 1,
            f1::CHIPCLKCSR => {
                self.f1regs.insert(addr, val & !regs::AVBITS);
                return;
            }
            f1::FRAMECTRL if val & regs::SFC_RF_TERM != 0 => {
                self.rf_terms += 1;
                self.cur = None;
            }
            _ => {}
        }
        self.f1regs.insert(addr, val);
    }

    fn bp_addr(&self, addr: u32, len: usize) -> Result<u32, i32> {
        if addr & regs::SB_ACCESS_2_4B_FLAG == 0 || len == 0 {
            return Err(EINVAL);
        }
        Ok(self.window() | (addr & regs::SB_OFT_ADDR_MASK))
    }

    fn read_incr(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), i32> {
        let bp = self.bp_addr(addr, buf.len())? as usize;
        if bp < RAM_SIZE {
            let src = self.ram.get(bp..bp + buf.len()).ok_or(EINVAL)?;
            buf.copy_from_slice(src);
            return Ok(());
        }
        if buf.len() != 4 {
            return Err(EINVAL);
        }
        buf.copy_from_slice(&self.bp_read32(bp as u32).to_le_bytes());
        Ok(())
    }

    fn write_incr(&mut self, addr: u32, buf: &[u8]) -> Result<(), i32> {
        let bp = self.bp_addr(addr, buf.len())? as usize;
        if bp < RAM_SIZE {
            let dst = self.ram.get_mut(bp..bp + buf.len()).ok_or(EINVAL)?;
            dst.copy_from_slice(buf);
            return Ok(());
        }
        if buf.len() != 4 {
            return Err(EINVAL);
        }
        self.bp_write32(bp as u32, u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
        Ok(())
    }

    /// 主机读 F2：按帧游标给数据，读过帧尾补零并结束本帧；无帧时全零
    fn f2_read(&mut self, buf: &mut [u8]) {
        if self.cur.is_none() {
            if let Some(mut frame) = self.rx_queue.pop_front() {
                self.last_clean = Some(frame.clone());
                if self.corrupt_next {
                    self.corrupt_next = false;
                    frame[2] ^= 0x01;
                }
                self.cur = Some((frame, 0));
            }
        }
        buf.fill(0);
        let Some((frame, pos)) = self.cur.as_mut() else {
            return;
        };
        let start = (*pos).min(frame.len());
        let n = (frame.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&frame[start..start + n]);
        *pos += buf.len();
        if *pos >= frame.len() {
            self.cur = None;
        }
    }

    /// 设备侧解析主机写来的帧（或聚合链）
    fn f2_write(&mut self, buf: &[u8]) {
        let mut off = 0;
        while off + HDRLEN <= buf.len() {
            let hw_len = u16::from_le_bytes([buf[off], buf[off + 1]]) as usize;
            let (frame_len, step, last, sw) = if self.txglom {
                let ext0 = get_le32(buf, off + HW_HDRLEN);
                let ext1 = get_le32(buf, off + HW_HDRLEN + 4);
                let sublen = (ext0 & 0xFFFF) as usize + HW_HDRLEN;
                let pad = (ext1 >> 16) as usize;
                (sublen, sublen + pad, ext0 & (1 << 24) != 0, off + HW_HDRLEN + HWEXT_LEN)
            } else {
                (hw_len, hw_len, true, off + HW_HDRLEN)
            };
            let sw0 = get_le32(buf, sw);
            let seq = sw0 as u8;
            let channel = ((sw0 >> 8) & 0xF) as u8;
            let doff = (sw0 >> 24) as usize;
            let end = (off + frame_len).min(buf.len());
            let payload = buf.get(off + doff..end).map(<[u8]>::to_vec).unwrap_or_default();
            if channel == Channel::Control as u8 {
                let resp = match self.responder.as_mut() {
                    Some(f) => f(&payload),
                    None => payload.clone(),
                };
                let window = seq.wrapping_add(9);
                let frame = rx_frame(Channel::Control, self.dev_seq, &resp, window);
                self.dev_seq = self.dev_seq.wrapping_add(1);
                self.push_rx(frame);
            }
            self.sent.push(SentFrame { channel, seq, payload });
            if last || step == 0 {
                break;
            }
            off += step;
        }
    }
}

/// 构造一个普通收帧
pub fn rx_frame(channel: Channel, seq: u8, payload: &[u8], window: u8) -> Vec<u8> {
    let mut buf = vec![0u8; HDRLEN + payload.len()];
    let buf_len = buf.len() as u16;
    pack_rx(
        &mut buf,
        &RxHeader {
            len: buf_len,
            seq,
            channel: channel as u8,
            glomdesc: false,
            nextlen: 0,
            doffset: HDRLEN as u8,
            flow: 0,
            window,
        },
    );
    buf[HDRLEN..].copy_from_slice(payload);
    buf
}

/// 构造 glom 描述符帧与超帧：`subs` 为 (通道, 负载)，子帧序号从 `seq + 1` 起
pub fn glom_frames(seq: u8, subs: &[(Channel, &[u8])], window: u8, blksize: usize) -> (Vec<u8>, Vec<u8>) {
    let mut lens: Vec<usize> = subs.iter().map(|(_, p)| HDRLEN + p.len()).collect();
    lens[0] += HDRLEN;
    let total: usize = lens.iter().sum();
    let rounded = total.div_ceil(blksize) * blksize;

    let mut desc_payload = Vec::new();
    for l in &lens {
        desc_payload.extend_from_slice(&(*l as u16).to_le_bytes());
    }
    let mut desc = vec![0u8; HDRLEN + desc_payload.len()];
    desc[HDRLEN..].copy_from_slice(&desc_payload);
    pack_rx(
        &mut desc,
        &RxHeader {
            len: (HDRLEN + desc_payload.len()) as u16,
            seq,
            channel: Channel::Glom as u8,
            glomdesc: true,
            nextlen: 0,
            doffset: HDRLEN as u8,
            flow: 0,
            window,
        },
    );

    let sseq = seq.wrapping_add(1);
    let mut sup = vec![0u8; rounded];
    pack_rx(
        &mut sup,
        &RxHeader {
            len: total as u16,
            seq: sseq,
            channel: Channel::Glom as u8,
            glomdesc: false,
            nextlen: 0,
            doffset: HDRLEN as u8,
            flow: 0,
            window,
        },
    );
    let mut off = HDRLEN;
    for (i, (ch, p)) in subs.iter().enumerate() {
        let sub = rx_frame(*ch, sseq.wrapping_add(i as u8), p, window);
        sup[off..off + sub.len()].copy_from_slice(&sub);
        off += sub.len();
    }
    (desc, sup)
}

pub struct MockFunc {
    num: u8,
    sim: Arc<Mutex<Sim>>,
}

impl MockFunc {
    fn sim(&self) -> Result<MutexGuard<'_, Sim>, i32> {
        let sim = self.sim.lock().map_err(|_| EINVAL)?;
        match sim.fail_all {
            Some(code) => Err(code),
            None => Ok(sim),
        }
    }
}

impl SdioFunc for MockFunc {
    fn num(&self) -> u8 {
        self.num
    }

    fn vendor(&self) -> u16 {
        mmc::SDIO_VENDOR_ID_BROADCOM
    }

    fn device(&self) -> u16 {
        0x4329
    }

    fn cur_blksize(&self) -> u16 {
        self.sim.lock().map(|s| s.blksize[self.num as usize]).unwrap_or(0)
    }

    fn readb(&self, addr: u32) -> Result<u8, i32> {
        Ok(self.sim()?.f1_readb(addr))
    }

    fn writeb(&self, addr: u32, b: u8) -> Result<(), i32> {
        self.sim()?.f1_writeb(addr, b);
        Ok(())
    }

    fn read_f0(&self, reg: u8) -> Result<u8, i32> {
        let sim = self.sim()?;
        if reg == SDIO_CCCR_INT_PENDING {
            let pending = sim.intstatus & sim.hostintmask != 0;
            return Ok(if pending { regs::INTR_STATUS_FUNC2 } else { 0 });
        }
        Ok(sim.f0reg(reg))
    }

    fn write_f0(&self, reg: u8, val: u8) -> Result<(), i32> {
        self.sim()?.f0regs.insert(reg, val);
        Ok(())
    }

    fn read_fifo(&self, _addr: u32, buf: &mut [u8]) -> Result<(), i32> {
        if self.num != 2 {
            return Err(EINVAL);
        }
        self.sim()?.f2_read(buf);
        Ok(())
    }

    fn write_fifo(&self, _addr: u32, buf: &[u8]) -> Result<(), i32> {
        if self.num != 2 {
            return Err(EINVAL);
        }
        self.sim()?.f2_write(buf);
        Ok(())
    }

    fn read_incr(&self, addr: u32, buf: &mut [u8]) -> Result<(), i32> {
        self.sim()?.read_incr(addr, buf)
    }

    fn write_incr(&self, addr: u32, buf: &[u8]) -> Result<(), i32> {
        self.sim()?.write_incr(addr, buf)
    }

    fn set_block_size(&self, blksz: u16) -> Result<(), i32> {
        self.sim()?.blksize[self.num as usize] = blksz;
        Ok(())
    }

    fn enable_func(&self) -> Result<(), i32> {
        let mut sim = self.sim()?;
        if self.num == 2 {
            sim.f2_enabled = true;
        }
        Ok(())
    }

    fn disable_func(&self) -> Result<(), i32> {
        let mut sim = self.sim()?;
        if self.num == 2 {
            sim.f2_enabled = false;
        }
        Ok(())
    }
}

struct NoDelay;

impl Delay for NoDelay {
    fn delay_us(&self, _us: u32) {}
}

struct StateLog(Arc<Mutex<Vec<BusState>>>);

impl BusStateObserver for StateLog {
    fn bus_state_changed(&self, state: BusState) {
        if let Ok(mut log) = self.0.lock() {
            log.push(state);
        }
    }
}

struct RxLog(Arc<Mutex<Vec<(Channel, Vec<u8>)>>>);

impl RxHandler for RxLog {
    fn rx_data(&self, skb: SkBuff) {
        if let Ok(mut log) = self.0.lock() {
            log.push((Channel::Data, skb.data().to_vec()));
        }
    }

    fn rx_event(&self, skb: SkBuff) {
        if let Ok(mut log) = self.0.lock() {
            log.push((Channel::Event, skb.data().to_vec()));
        }
    }
}

pub struct MockChip {
    sim: Arc<Mutex<Sim>>,
    observed: Arc<Mutex<Vec<BusState>>>,
    received: Arc<Mutex<Vec<(Channel, Vec<u8>)>>>,
}

impl MockChip {
    pub fn new() -> Self {
        Self {
            sim: Arc::new(Mutex::new(Sim::new())),
            observed: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn func(&self, num: u8) -> MockFunc {
        MockFunc {
            num,
            sim: self.sim.clone(),
        }
    }

    /// 未经 attach 的设备访问对象
    pub fn device(&self) -> SdioDev<MockFunc> {
        SdioDev::new(
            self.func(1),
            self.func(2),
            Box::new(NoDelay),
            Box::new(StateLog(self.observed.clone())),
        )
    }

    /// 完成 attach 的总线
    pub fn bus(&self, config: SdioConfig) -> SdioBus<MockFunc> {
        self.sim().txglom = config.txglom;
        SdioBus::attach(
            self.func(1),
            self.func(2),
            config,
            Box::new(NoDelay),
            Box::new(StateLog(self.observed.clone())),
            Box::new(RxLog(self.received.clone())),
        )
        .unwrap()
    }

    pub fn sim(&self) -> MutexGuard<'_, Sim> {
        self.sim.lock().unwrap()
    }

    pub fn sim_mut(&self) -> MutexGuard<'_, Sim> {
        self.sim()
    }

    pub fn observed(&self) -> Vec<BusState> {
        self.observed.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<(Channel, Vec<u8>)> {
        self.received.lock().unwrap().clone()
    }
}
