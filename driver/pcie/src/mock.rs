//! 模拟 PCIe 设备：配置空间、BAR0 背板寄存器、TCM 与 DMA 内存
//!
//! 芯片按 4356（AI 背板，CR4）布置。CR4 释放后模拟固件在 RAM 中布置共享结构、ring info 与控制台，
//! 并把共享结构地址写到 RAM 末字。邮箱门铃到达时取走主机命令；D3 通知立即回应答。

use std::boxed::Box;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec;
use std::vec::Vec;

use bus::{BusState, BusStateObserver, Delay};
use chip::regs::{ai, armcr4, cc, chip_id, core_id, SI_ENUM_BASE_DEFAULT};

use crate::bus::{PcieBus, RingConsumer};
use crate::config::PcieConfig;
use crate::device::{DmaBuffer, PcieDevice};
use crate::regs::{
    self, cfg, console, d2h_mb, h2d_mb, int, pcie2, ringinfo, ringmem, shared, shared_flags,
};

const EINVAL: i32 = -22;
const ENOMEM: i32 = -12;

pub const CC_BASE: u32 = SI_ENUM_BASE_DEFAULT;
pub const CR4_BASE: u32 = 0x1800_2000;
pub const CR4_WRAP: u32 = 0x1810_2000;
pub const PCIE2_BASE: u32 = 0x1800_3000;
const EROM_ADDR: u32 = 0x1810_9000;

pub const RAMBASE: u32 = 0x18_0000;
/// 2 个 A bank，各 64K
pub const RAM_SIZE: u32 = 0x2_0000;
const BANKS: [u32; 2] = [7, 7];

/// 模拟固件的内存布局
pub const SHARED_ADDR: u32 = 0x19_0000;
pub const RINGINFO_ADDR: u32 = 0x19_0100;
pub const RINGMEM_ADDR: u32 = 0x19_0200;
const H2D_W_ADDR: u32 = 0x19_0300;
const H2D_R_ADDR: u32 = 0x19_0400;
const D2H_W_ADDR: u32 = 0x19_0500;
const D2H_R_ADDR: u32 = 0x19_0600;
pub const HTOD_MB_ADDR: u32 = 0x19_0700;
pub const DTOH_MB_ADDR: u32 = 0x19_0704;
const CONSOLE_ADDR: u32 = 0x19_0800;
const CONSOLE_BUF: u32 = 0x19_0900;
const CONSOLE_SIZE: u32 = 256;

pub const DEFAULT_FLAGS: u32 = 6 | shared_flags::HOSTRDY_DB1;

/// 下标种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idx {
    H2dW,
    H2dR,
    D2hW,
    D2hR,
}

impl Idx {
    fn tcm_ptr(self) -> u32 {
        match self {
            Idx::H2dW => ringinfo::H2D_W_IDX_PTR,
            Idx::H2dR => ringinfo::H2D_R_IDX_PTR,
            Idx::D2hW => ringinfo::D2H_W_IDX_PTR,
            Idx::D2hR => ringinfo::D2H_R_IDX_PTR,
        }
    }

    fn haddr(self) -> u32 {
        match self {
            Idx::H2dW => ringinfo::H2D_W_IDX_HADDR,
            Idx::H2dR => ringinfo::H2D_R_IDX_HADDR,
            Idx::D2hW => ringinfo::D2H_W_IDX_HADDR,
            Idx::D2hR => ringinfo::D2H_R_IDX_HADDR,
        }
    }
}

fn erom_component(id: u16, rev: u8) -> [u32; 2] {
    [((id as u32) << 8) | 1, ((rev as u32) << 24) | (1 << 14) | 1]
}

fn erom_address(base: u32, stype: u32, size: u32) -> u32 {
    (base & 0xFFFF_F000) | (stype << 6) | (size << 4) | 5
}

/// 三个核心：chipcommon、CR4、PCIE2，各带主 wrapper
fn build_erom() -> Vec<u32> {
    let mut erom = Vec::new();
    for (id, rev, base) in [
        (core_id::CHIPCOMMON, 49, CC_BASE),
        (core_id::ARM_CR4, 7, CR4_BASE),
        (core_id::PCIE2, 11, PCIE2_BASE),
    ] {
        erom.extend_from_slice(&erom_component(id, rev));
        erom.push(3);
        erom.push(erom_address(base, 0, 0));
        erom.push(erom_address(base + 0x10_0000, 3, 0));
    }
    erom.push(0xF);
    erom
}

pub struct Sim {
    pub tcm: Vec<u8>,
    pub regs: BTreeMap<u32, u32>,
    pub cfg: BTreeMap<u32, u32>,
    erom: Vec<u32>,
    pub window_writes: u32,
    pub mailboxint: u32,
    /// 置位后所有访问返回该错误码
    pub fail_all: Option<i32>,
    /// CR4 释放后是否写出共享结构
    pub boots: bool,
    pub shared_flags: u32,
    pub max_flowrings: u16,
    /// 代替共享结构地址写到 RAM 末字的值
    pub sentinel_override: Option<u32>,
    pub rstvec: Option<u32>,
    /// 设备取走的主机邮箱命令
    pub htod_log: Vec<u32>,
    pub sbmbx_pulses: u32,
    pub ack_d3: bool,
    /// 控制提交环上的条目原样回到控制完成环
    pub echo_ctrl: bool,
    pub bells: u32,
    pub hostready: u32,
    dma: BTreeMap<u64, Arc<Mutex<Vec<u8>>>>,
    next_dma: u64,
    /// 该大小的 DMA 分配失败
    pub dma_fail_len: Option<usize>,
}

impl Sim {
    fn new() -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(CC_BASE + cc::CHIPID, (1 << 28) | (2 << 16) | chip_id::BCM4356);
        regs.insert(CC_BASE + cc::EROMPTR, EROM_ADDR);
        regs.insert(CR4_BASE + armcr4::CAP, BANKS.len() as u32);
        Self {
            tcm: vec![0; (RAMBASE + RAM_SIZE) as usize],
            regs,
            cfg: BTreeMap::new(),
            erom: build_erom(),
            window_writes: 0,
            mailboxint: 0,
            fail_all: None,
            boots: true,
            shared_flags: DEFAULT_FLAGS,
            max_flowrings: 4,
            sentinel_override: None,
            rstvec: None,
            htod_log: Vec::new(),
            sbmbx_pulses: 0,
            ack_d3: true,
            echo_ctrl: true,
            bells: 0,
            hostready: 0,
            dma: BTreeMap::new(),
            next_dma: 0x1_0000_0000,
            dma_fail_len: None,
        }
    }

    pub fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn tcm32(&self, addr: u32) -> u32 {
        let a = addr as usize;
        u32::from_le_bytes([self.tcm[a], self.tcm[a + 1], self.tcm[a + 2], self.tcm[a + 3]])
    }

    pub fn set_tcm32(&mut self, addr: u32, val: u32) {
        let a = addr as usize;
        self.tcm[a..a + 4].copy_from_slice(&val.to_le_bytes());
    }

    pub fn tcm16(&self, addr: u32) -> u16 {
        let a = addr as usize;
        u16::from_le_bytes([self.tcm[a], self.tcm[a + 1]])
    }

    fn set_tcm16(&mut self, addr: u32, val: u16) {
        let a = addr as usize;
        self.tcm[a..a + 2].copy_from_slice(&val.to_le_bytes());
    }

    pub fn tcm64(&self, addr: u32) -> u64 {
        self.tcm32(addr) as u64 | ((self.tcm32(addr + 4) as u64) << 32)
    }

    /// 固件镜像声明的 RAM 大小
    pub fn ramsize(&self) -> u32 {
        let at = RAMBASE + regs::RAMSIZE_OFFSET as u32;
        if self.tcm32(at) == regs::RAMSIZE_MAGIC {
            self.tcm32(at + 4)
        } else {
            RAM_SIZE
        }
    }

    fn window(&self) -> u32 {
        self.cfg.get(&cfg::BAR0_WINDOW).copied().unwrap_or(0)
    }

    fn bp_read32(&self, addr: u32) -> u32 {
        if (EROM_ADDR..EROM_ADDR + 4 * self.erom.len() as u32).contains(&addr) {
            return self.erom[((addr - EROM_ADDR) / 4) as usize];
        }
        match addr {
            _ if addr == CR4_BASE + armcr4::BANKINFO => {
                let idx = (self.reg(CR4_BASE + armcr4::BANKIDX) & 0xFF) as usize;
                BANKS.get(idx).copied().unwrap_or(0)
            }
            _ if addr == PCIE2_BASE + pcie2::MAILBOXINT => self.mailboxint,
            _ => self.reg(addr),
        }
    }

    fn bp_write32(&mut self, addr: u32, val: u32) {
        match addr {
            _ if addr == PCIE2_BASE + pcie2::MAILBOXINT => {
                self.mailboxint &= !val;
                return;
            }
            _ if addr == PCIE2_BASE + pcie2::H2D_MAILBOX_0 => {
                self.bells += 1;
                if self.echo_ctrl {
                    self.echo_ctrl_items();
                }
            }
            _ if addr == PCIE2_BASE + pcie2::H2D_MAILBOX_1 => self.hostready += 1,
            _ => {}
        }
        self.regs.insert(addr, val);
        if addr == CR4_WRAP + ai::IOCTL && val == ai::IOCTL_CLK {
            self.boot();
        }
    }

    fn cfg_write(&mut self, off: u32, val: u32) {
        match off {
            cfg::BAR0_WINDOW => self.window_writes += 1,
            cfg::SBMBX => {
                self.sbmbx_pulses += 1;
                self.take_htod();
            }
            _ => {}
        }
        self.cfg.insert(off, val);
    }

    /// CR4 释放：取复位向量，按需布置共享结构
    fn boot(&mut self) {
        self.rstvec = Some(self.tcm32(0));
        if !self.boots {
            return;
        }
        let version = self.shared_flags & shared_flags::VERSION_MASK;
        let sh = SHARED_ADDR;
        self.set_tcm32(sh + shared::FLAGS, self.shared_flags);
        self.set_tcm32(sh + shared::CONSOLE_ADDR, CONSOLE_ADDR);
        self.set_tcm32(sh + shared::HTOD_MB_DATA_ADDR, HTOD_MB_ADDR);
        self.set_tcm32(sh + shared::DTOH_MB_DATA_ADDR, DTOH_MB_ADDR);
        self.set_tcm32(sh + shared::RING_INFO_ADDR, RINGINFO_ADDR);

        let ri = RINGINFO_ADDR;
        self.set_tcm32(ri + ringinfo::RINGMEM, RINGMEM_ADDR);
        self.set_tcm32(ri + ringinfo::H2D_W_IDX_PTR, H2D_W_ADDR);
        self.set_tcm32(ri + ringinfo::H2D_R_IDX_PTR, H2D_R_ADDR);
        self.set_tcm32(ri + ringinfo::D2H_W_IDX_PTR, D2H_W_ADDR);
        self.set_tcm32(ri + ringinfo::D2H_R_IDX_PTR, D2H_R_ADDR);
        let sub = self.max_flowrings + regs::H2D_COMMON_RINGS as u16;
        if version >= regs::SHARED_VERSION_6 {
            self.set_tcm16(ri + ringinfo::MAX_FLOWRINGS, self.max_flowrings);
            self.set_tcm16(ri + ringinfo::MAX_SUBMISSIONRINGS, sub);
            self.set_tcm16(ri + ringinfo::MAX_COMPLETIONRINGS, regs::D2H_COMMON_RINGS as u16);
        } else {
            self.set_tcm16(ri + ringinfo::MAX_FLOWRINGS, sub);
        }

        self.set_tcm32(HTOD_MB_ADDR, 0);
        self.set_tcm32(DTOH_MB_ADDR, 0);
        self.set_tcm32(CONSOLE_ADDR + console::BUFADDR, CONSOLE_BUF);
        self.set_tcm32(CONSOLE_ADDR + console::BUFSIZE, CONSOLE_SIZE);
        self.set_tcm32(CONSOLE_ADDR + console::WRITEIDX, 0);

        let sentinel = RAMBASE + self.ramsize() - 4;
        self.set_tcm32(sentinel, self.sentinel_override.unwrap_or(SHARED_ADDR));
        self.regs.insert(PCIE2_BASE + pcie2::INTMASK, int::ENABLED);
    }

    /// 设备取走主机邮箱命令
    fn take_htod(&mut self) {
        let data = self.tcm32(HTOD_MB_ADDR);
        if data == 0 {
            return;
        }
        self.set_tcm32(HTOD_MB_ADDR, 0);
        self.htod_log.push(data);
        if data & h2d_mb::D3_INFORM != 0 && self.ack_d3 {
            self.d2h_mailbox(d2h_mb::D3_ACK);
        }
    }

    /// 设备发出邮箱数据
    pub fn d2h_mailbox(&mut self, data: u32) {
        let cur = self.tcm32(DTOH_MB_ADDR);
        self.set_tcm32(DTOH_MB_ADDR, cur | data);
        self.mailboxint |= int::FN0_0;
    }

    /// 追加控制台输出
    pub fn console_write(&mut self, text: &str) {
        let mut w = self.tcm32(CONSOLE_ADDR + console::WRITEIDX);
        for b in text.bytes() {
            self.tcm[(CONSOLE_BUF + w) as usize] = b;
            w = (w + 1) % CONSOLE_SIZE;
        }
        self.set_tcm32(CONSOLE_ADDR + console::WRITEIDX, w);
    }

    fn dma_find(&self, addr: u64) -> Option<(Arc<Mutex<Vec<u8>>>, usize)> {
        let (base, mem) = self.dma.range(..=addr).next_back()?;
        let off = (addr - base) as usize;
        (off < mem.lock().unwrap().len()).then(|| (mem.clone(), off))
    }

    pub fn dma_read(&self, addr: u64, len: usize) -> Vec<u8> {
        let (mem, off) = self.dma_find(addr).unwrap();
        let m = mem.lock().unwrap();
        m[off..off + len].to_vec()
    }

    fn dma_write(&self, addr: u64, data: &[u8]) {
        let (mem, off) = self.dma_find(addr).unwrap();
        mem.lock().unwrap()[off..off + data.len()].copy_from_slice(data);
    }

    /// 主机仍持有的 DMA 缓冲数
    pub fn live_dma(&self) -> usize {
        self.dma.values().filter(|m| Arc::strong_count(m) > 1).count()
    }

    /// 主机下标缓冲中的宽度；0 表示下标在 TCM
    fn host_index_width(&self) -> usize {
        if self.tcm64(RINGINFO_ADDR + ringinfo::H2D_W_IDX_HADDR) == 0 {
            0
        } else if self.shared_flags & shared_flags::DMA_2B_IDX != 0 {
            2
        } else {
            4
        }
    }

    pub fn read_idx(&self, kind: Idx, ring: usize) -> u16 {
        match self.host_index_width() {
            0 => self.tcm16(self.tcm32(RINGINFO_ADDR + kind.tcm_ptr()) + 4 * ring as u32),
            w => {
                let addr = self.tcm64(RINGINFO_ADDR + kind.haddr()) + (w * ring) as u64;
                let b = self.dma_read(addr, 2);
                u16::from_le_bytes([b[0], b[1]])
            }
        }
    }

    pub fn write_idx(&mut self, kind: Idx, ring: usize, val: u16) {
        match self.host_index_width() {
            0 => {
                let addr = self.tcm32(RINGINFO_ADDR + kind.tcm_ptr()) + 4 * ring as u32;
                self.set_tcm16(addr, val);
            }
            w => {
                let addr = self.tcm64(RINGINFO_ADDR + kind.haddr()) + (w * ring) as u64;
                let mut b = vec![0u8; w];
                b[..2].copy_from_slice(&val.to_le_bytes());
                self.dma_write(addr, &b);
            }
        }
    }

    /// 公共环描述：(深度, 条目大小, DMA 地址)
    pub fn ring_desc(&self, ring: usize) -> (u16, u16, u64) {
        let rm = RINGMEM_ADDR + ringmem::SIZE * ring as u32;
        (
            self.tcm16(rm + ringmem::MAX_ITEM),
            self.tcm16(rm + ringmem::LEN_ITEMS),
            self.tcm64(rm + ringmem::BASE_ADDR),
        )
    }

    /// 设备读走提交环 `ring` 上的新条目
    pub fn h2d_take(&mut self, ring: usize, base: u64, depth: u16, item_len: u16) -> Vec<Vec<u8>> {
        let w = self.read_idx(Idx::H2dW, ring);
        let mut r = self.read_idx(Idx::H2dR, ring);
        let mut out = Vec::new();
        while r != w {
            out.push(self.dma_read(base + r as u64 * item_len as u64, item_len as usize));
            r = (r + 1) % depth;
        }
        self.write_idx(Idx::H2dR, ring, r);
        out
    }

    pub fn h2d_items(&mut self, ring: usize) -> Vec<Vec<u8>> {
        let (depth, item_len, base) = self.ring_desc(ring);
        self.h2d_take(ring, base, depth, item_len)
    }

    /// 设备在完成环 `ring`（公共环编号 2..5）上写一个条目并敲门铃
    pub fn d2h_push(&mut self, ring: usize, item: &[u8]) {
        let (depth, item_len, base) = self.ring_desc(ring);
        let d2h = ring - regs::H2D_COMMON_RINGS;
        let w = self.read_idx(Idx::D2hW, d2h);
        let mut slot = vec![0u8; item_len as usize];
        let n = item.len().min(slot.len());
        slot[..n].copy_from_slice(&item[..n]);
        self.dma_write(base + w as u64 * item_len as u64, &slot);
        self.write_idx(Idx::D2hW, d2h, (w + 1) % depth);
        self.mailboxint |= 0x0001_0000;
    }

    fn echo_ctrl_items(&mut self) {
        if self.ring_desc(0).2 == 0 || self.ring_desc(2).2 == 0 {
            return;
        }
        for item in self.h2d_items(0) {
            self.d2h_push(2, &item);
        }
    }
}

pub struct MockDma {
    addr: u64,
    mem: Arc<Mutex<Vec<u8>>>,
}

impl DmaBuffer for MockDma {
    fn dma_addr(&self) -> u64 {
        self.addr
    }

    fn len(&self) -> usize {
        self.mem.lock().unwrap().len()
    }

    fn read(&self, off: usize, buf: &mut [u8]) {
        let m = self.mem.lock().unwrap();
        buf.copy_from_slice(&m[off..off + buf.len()]);
    }

    fn write(&self, off: usize, data: &[u8]) {
        self.mem.lock().unwrap()[off..off + data.len()].copy_from_slice(data);
    }
}

pub struct MockPcie {
    sim: Arc<Mutex<Sim>>,
    device: u16,
}

impl MockPcie {
    fn sim(&self) -> Result<MutexGuard<'_, Sim>, i32> {
        let sim = self.sim.lock().map_err(|_| EINVAL)?;
        match sim.fail_all {
            Some(code) => Err(code),
            None => Ok(sim),
        }
    }
}

impl PcieDevice for MockPcie {
    type Dma = MockDma;

    fn vendor(&self) -> u16 {
        regs::PCI_VENDOR_BROADCOM
    }

    fn device(&self) -> u16 {
        self.device
    }

    fn config_read32(&self, off: u32) -> Result<u32, i32> {
        Ok(self.sim()?.cfg.get(&off).copied().unwrap_or(0))
    }

    fn config_write32(&self, off: u32, val: u32) -> Result<(), i32> {
        self.sim()?.cfg_write(off, val);
        Ok(())
    }

    fn bar0_read32(&self, off: u32) -> Result<u32, i32> {
        let sim = self.sim()?;
        let addr = sim.window() + off;
        Ok(sim.bp_read32(addr))
    }

    fn bar0_write32(&self, off: u32, val: u32) -> Result<(), i32> {
        let mut sim = self.sim()?;
        let addr = sim.window() + off;
        sim.bp_write32(addr, val);
        Ok(())
    }

    fn tcm_read(&self, off: u32, buf: &mut [u8]) -> Result<(), i32> {
        let sim = self.sim()?;
        let a = off as usize;
        let src = sim.tcm.get(a..a + buf.len()).ok_or(EINVAL)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn tcm_write(&self, off: u32, data: &[u8]) -> Result<(), i32> {
        let mut sim = self.sim()?;
        let a = off as usize;
        let dst = sim.tcm.get_mut(a..a + data.len()).ok_or(EINVAL)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn dma_alloc(&self, size: usize) -> Result<MockDma, i32> {
        let mut sim = self.sim()?;
        if sim.dma_fail_len == Some(size) {
            return Err(ENOMEM);
        }
        let addr = sim.next_dma;
        sim.next_dma += (size as u64).div_ceil(0x1000).max(1) * 0x1000;
        let mem = Arc::new(Mutex::new(vec![0u8; size]));
        sim.dma.insert(addr, mem.clone());
        Ok(MockDma { addr, mem })
    }
}

pub struct NoDelay;

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

struct DoorbellLog(Arc<AtomicU32>);

impl RingConsumer for DoorbellLog {
    fn rings_ready(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct MockBoard {
    sim: Arc<Mutex<Sim>>,
    device: u16,
    observed: Arc<Mutex<Vec<BusState>>>,
    doorbells: Arc<AtomicU32>,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::with_device(0x43EC)
    }

    pub fn with_device(device: u16) -> Self {
        Self {
            sim: Arc::new(Mutex::new(Sim::new())),
            device,
            observed: Arc::new(Mutex::new(Vec::new())),
            doorbells: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn attach(&self, config: PcieConfig) -> bus::Result<PcieBus<MockPcie>> {
        PcieBus::attach(
            MockPcie {
                sim: self.sim.clone(),
                device: self.device,
            },
            config,
            Box::new(NoDelay),
            Box::new(StateLog(self.observed.clone())),
            Box::new(DoorbellLog(self.doorbells.clone())),
        )
    }

    pub fn bus(&self, config: PcieConfig) -> PcieBus<MockPcie> {
        self.attach(config).unwrap()
    }

    pub fn sim(&self) -> MutexGuard<'_, Sim> {
        self.sim.lock().unwrap()
    }

    pub fn observed(&self) -> Vec<BusState> {
        self.observed.lock().unwrap().clone()
    }

    pub fn doorbells(&self) -> u32 {
        self.doorbells.load(Ordering::Relaxed)
    }
}
