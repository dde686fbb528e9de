//! 消息环：公共环与流环
//!
//! 每个环是一块 DMA 缓冲加一个 [`Commonring`]。本地槽数组与 DMA 缓冲按同一下标对应：
//! 提交时写本地槽再拷到 DMA，消费前把设备写入的条目从 DMA 拷回本地槽。
//!
//! 读写下标的同步方式由共享结构协商：设备 RAM 中的 16 位字，或主机 DMA 下标缓冲中的 2/4 字节字。
//! 门铃是 PCIE2 核心的 H2D_MAILBOX_0 写。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use bus::{Error, Result};
use commonring::{Commonring, RingCallbacks};

use crate::device::{DmaBuffer, PcieDev, PcieDevice, PcieState};
use crate::regs::{self, pcie2, ringinfo, ringmem, shared};
use crate::shared::{PcieShared, RingInfo};

/// 公共环编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommonRingId {
    /// 控制消息提交
    CtrlSubmit = 0,
    /// 接收缓冲投递
    RxPost = 1,
    /// 控制消息完成
    CtrlComplete = 2,
    TxComplete = 3,
    RxComplete = 4,
}

/// 下标存放位置
enum IndexStore<M> {
    /// 设备 RAM，16 位
    Tcm,
    /// 主机 DMA 下标缓冲，`width` 字节
    Host { buf: Arc<M>, width: usize },
}

impl<M> Clone for IndexStore<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Tcm => Self::Tcm,
            Self::Host { buf, width } => Self::Host {
                buf: buf.clone(),
                width: *width,
            },
        }
    }
}

const NO_LATCH: u32 = u32::MAX;

/// 绑定到一个环的回调
pub struct PcieRingOps<D: PcieDevice> {
    dev: PcieDev<D>,
    store: IndexStore<D::Dma>,
    w_idx_addr: u32,
    r_idx_addr: u32,
    /// 消费期间固定的设备写下标
    latched_w: AtomicU32,
}

impl<D: PcieDevice> PcieRingOps<D> {
    fn new(dev: PcieDev<D>, store: IndexStore<D::Dma>, w_idx_addr: u32, r_idx_addr: u32) -> Self {
        Self {
            dev,
            store,
            w_idx_addr,
            r_idx_addr,
            latched_w: AtomicU32::new(NO_LATCH),
        }
    }

    fn read_idx(&self, addr: u32) -> Result<u16> {
        match &self.store {
            IndexStore::Tcm => self.dev.tcm_read16(addr),
            IndexStore::Host { buf, width } => {
                let mut b = [0u8; 4];
                buf.read(addr as usize, &mut b[..*width]);
                Ok(u32::from_le_bytes(b) as u16)
            }
        }
    }

    fn write_idx(&self, addr: u32, val: u16) -> Result<()> {
        match &self.store {
            IndexStore::Tcm => self.dev.tcm_write16(addr, val),
            IndexStore::Host { buf, width } => {
                let b = (val as u32).to_le_bytes();
                buf.write(addr as usize, &b[..*width]);
                Ok(())
            }
        }
    }
}

impl<D: PcieDevice> RingCallbacks for PcieRingOps<D> {
    fn ring_bell(&self) -> Result<()> {
        if self.dev.state() != PcieState::Up {
            return Err(Error::Io { code: -5 });
        }
        self.dev.reg_write32(pcie2::H2D_MAILBOX_0, 1)
    }

    fn pull_rptr(&self) -> Result<Option<u16>> {
        self.read_idx(self.r_idx_addr).map(Some)
    }

    fn pull_wptr(&self) -> Result<Option<u16>> {
        match self.latched_w.load(Ordering::Acquire) {
            NO_LATCH => self.read_idx(self.w_idx_addr).map(Some),
            w => Ok(Some(w as u16)),
        }
    }

    fn push_rptr(&self, r_ptr: u16) -> Result<()> {
        self.write_idx(self.r_idx_addr, r_ptr)
    }

    fn push_wptr(&self, w_ptr: u16) -> Result<()> {
        self.write_idx(self.w_idx_addr, w_ptr)
    }
}

/// 一个消息环
pub struct MsgRing<D: PcieDevice> {
    id: u16,
    ring: Commonring<PcieRingOps<D>>,
    dma: Mutex<Option<D::Dma>>,
}

impl<D: PcieDevice> MsgRing<D> {
    fn new(id: u16, ops: PcieRingOps<D>) -> Self {
        Self {
            id,
            ring: Commonring::new(ops),
            dma: Mutex::new(None),
        }
    }

    /// 分配 DMA 缓冲并配置环；`ringmem_addr` 给出时把描述写到设备侧
    fn setup(&self, dev: &PcieDev<D>, ringmem_addr: Option<u32>, depth: u16, item_len: u16) -> Result<u64> {
        let buf = dev.dma_alloc(depth as usize * item_len as usize)?;
        let addr = buf.dma_addr();
        if let Some(rm) = ringmem_addr {
            dev.tcm_write16(rm + ringmem::MAX_ITEM, depth)?;
            dev.tcm_write16(rm + ringmem::LEN_ITEMS, item_len)?;
            dev.tcm_write64(rm + ringmem::BASE_ADDR, addr)?;
        }
        self.ring.configure(depth, item_len, addr)?;
        *self.dma.lock() = Some(buf);
        log::debug!(
            target: "brcmfmac::pcie",
            "ring {} depth {} item {} @ {:#x}",
            self.id, depth, item_len, addr
        );
        Ok(addr)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.dma.lock().is_some()
    }

    pub fn depth(&self) -> u16 {
        self.ring.lock().depth()
    }

    pub fn item_len(&self) -> u16 {
        self.ring.lock().item_len()
    }

    pub fn dma_addr(&self) -> Option<u64> {
        self.dma.lock().as_ref().map(|b| b.dma_addr())
    }

    /// 提交一个条目（不足条目大小时补零）并敲门铃；环满返回 `Busy`
    pub fn submit(&self, item: &[u8]) -> Result<()> {
        let dma = self.dma.lock();
        let Some(buf) = dma.as_ref() else {
            return Err(Error::NotReady);
        };
        let mut g = self.ring.lock();
        let item_len = g.item_len() as usize;
        if item.len() > item_len {
            return Err(Error::InvalidArgument);
        }
        let idx = g.w_ptr() as usize;
        let Some(slot) = g.reserve_for_write()? else {
            return Err(Error::Busy);
        };
        slot.fill(0);
        slot[..item.len()].copy_from_slice(item);
        buf.write(idx * item_len, slot);
        g.write_complete()
    }

    /// 消费至多 `max` 个设备写入的条目，返回条目数
    pub fn consume(&self, max: usize, mut f: impl FnMut(&[u8])) -> Result<usize> {
        let dma = self.dma.lock();
        let Some(buf) = dma.as_ref() else {
            return Ok(0);
        };
        let ops = self.ring.callbacks();
        let mut g = self.ring.lock();
        let depth = g.depth();
        let item_len = g.item_len() as usize;
        let w = ops.read_idx(ops.w_idx_addr)?;
        if w >= depth {
            log::warn!(target: "brcmfmac::pcie", "ring {} bad write index {}", self.id, w);
            return Err(Error::BadFrame);
        }

        let mut i = g.r_ptr();
        while i != w {
            let slot = g.slot_mut(i).ok_or(Error::InvalidArgument)?;
            buf.read(i as usize * item_len, slot);
            i = (i + 1) % depth;
        }

        ops.latched_w.store(w as u32, Ordering::Release);
        let mut done = 0usize;
        let res = (|| -> Result<()> {
            while done < max {
                let Some((items, n)) = g.get_read_ptr()? else {
                    break;
                };
                let take = (n as usize).min(max - done);
                for item in items.chunks(item_len).take(take) {
                    f(item);
                }
                g.read_complete(take as u16)?;
                done += take;
            }
            Ok(())
        })();
        ops.latched_w.store(NO_LATCH, Ordering::Release);
        res.map(|_| done)
    }

    /// 释放 DMA 缓冲
    fn release(&self) {
        self.dma.lock().take();
    }
}

/// 共享结构协商出的全部环
pub struct PcieRings<D: PcieDevice> {
    common: Vec<MsgRing<D>>,
    flow: Vec<MsgRing<D>>,
    /// 主机侧下标宽度；0 表示下标在设备 RAM
    dma_index_size: usize,
    _idxbuf: Option<Arc<D::Dma>>,
    _scratch: D::Dma,
    _ringupd: D::Dma,
}

impl<D: PcieDevice> PcieRings<D> {
    /// 读 ring info，分配公共环与下标缓冲，并建立流环数组
    pub fn setup(dev: &PcieDev<D>, sh: &PcieShared, want_dma_index: bool) -> Result<Self> {
        let mut raw = [0u8; ringinfo::LEN];
        dev.tcm_read(sh.ring_info_addr, &mut raw)?;
        let info = RingInfo::parse(&raw, sh.version())?;

        let mut idx_size = if want_dma_index { sh.dma_index_size() } else { 0 };
        let mut idxbuf = None;
        if idx_size != 0 {
            let rings = info.max_submissionrings as usize + info.max_completionrings as usize;
            match dev.dma_alloc(rings * idx_size * 2) {
                Ok(b) => idxbuf = Some(Arc::new(b)),
                Err(_) => {
                    log::warn!(target: "brcmfmac::pcie", "no host index buffer, using device memory");
                    idx_size = 0;
                }
            }
        }

        let (store, step, mut h2d_w, mut h2d_r, mut d2h_w, mut d2h_r) = match &idxbuf {
            None => (
                IndexStore::Tcm,
                4,
                info.h2d_w_idx_ptr,
                info.h2d_r_idx_ptr,
                info.d2h_w_idx_ptr,
                info.d2h_r_idx_ptr,
            ),
            Some(buf) => {
                let step = idx_size as u32;
                let sub = info.max_submissionrings as u32 * step;
                let cpl = info.max_completionrings as u32 * step;
                let (h2d_w, h2d_r, d2h_w, d2h_r) = (0, sub, 2 * sub, 2 * sub + cpl);
                let base = buf.dma_addr();
                let ri = sh.ring_info_addr;
                dev.tcm_write64(ri + ringinfo::H2D_W_IDX_HADDR, base + h2d_w as u64)?;
                dev.tcm_write64(ri + ringinfo::H2D_R_IDX_HADDR, base + h2d_r as u64)?;
                dev.tcm_write64(ri + ringinfo::D2H_W_IDX_HADDR, base + d2h_w as u64)?;
                dev.tcm_write64(ri + ringinfo::D2H_R_IDX_HADDR, base + d2h_r as u64)?;
                (
                    IndexStore::Host {
                        buf: buf.clone(),
                        width: idx_size,
                    },
                    step,
                    h2d_w,
                    h2d_r,
                    d2h_w,
                    d2h_r,
                )
            }
        };

        let itemsize = if sh.version() >= regs::SHARED_VERSION_7 {
            regs::RING_ITEMSIZE
        } else {
            regs::RING_ITEMSIZE_PRE_V7
        };
        let mut ringmem_addr = info.ringmem;
        let mut common = Vec::with_capacity(regs::COMMON_RINGS);
        for i in 0..regs::COMMON_RINGS {
            let (w, r) = if i < regs::H2D_COMMON_RINGS {
                let p = (h2d_w, h2d_r);
                h2d_w += step;
                h2d_r += step;
                p
            } else {
                let p = (d2h_w, d2h_r);
                d2h_w += step;
                d2h_r += step;
                p
            };
            let ring = MsgRing::new(i as u16, PcieRingOps::new(dev.clone(), store.clone(), w, r));
            ring.setup(dev, Some(ringmem_addr), regs::RING_MAX_ITEM[i], itemsize[i])?;
            ringmem_addr += ringmem::SIZE;
            common.push(ring);
        }

        let mut flow = Vec::with_capacity(info.max_flowrings as usize);
        for i in 0..info.max_flowrings {
            let ops = PcieRingOps::new(dev.clone(), store.clone(), h2d_w, h2d_r);
            h2d_w += step;
            h2d_r += step;
            flow.push(MsgRing::new(i + regs::H2D_COMMON_RINGS as u16, ops));
        }

        let scratch = dev.dma_alloc(regs::DMA_D2H_SCRATCH_BUF_LEN)?;
        dev.tcm_write32(sh.addr + shared::DMA_SCRATCH_LEN, regs::DMA_D2H_SCRATCH_BUF_LEN as u32)?;
        dev.tcm_write64(sh.addr + shared::DMA_SCRATCH_ADDR, scratch.dma_addr())?;
        let ringupd = dev.dma_alloc(regs::DMA_D2H_RINGUPD_BUF_LEN)?;
        dev.tcm_write32(sh.addr + shared::DMA_RINGUPD_LEN, regs::DMA_D2H_RINGUPD_BUF_LEN as u32)?;
        dev.tcm_write64(sh.addr + shared::DMA_RINGUPD_ADDR, ringupd.dma_addr())?;

        log::info!(
            target: "brcmfmac::pcie",
            "rings ready: {} common, {} flow, index {}",
            common.len(),
            flow.len(),
            if idx_size == 0 { "device" } else { "host" }
        );
        Ok(Self {
            common,
            flow,
            dma_index_size: idx_size,
            _idxbuf: idxbuf,
            _scratch: scratch,
            _ringupd: ringupd,
        })
    }

    pub fn common(&self, id: CommonRingId) -> &MsgRing<D> {
        &self.common[id as usize]
    }

    pub fn max_flowrings(&self) -> u16 {
        self.flow.len() as u16
    }

    pub fn dma_index_size(&self) -> usize {
        self.dma_index_size
    }

    pub fn flowring(&self, flowid: u16) -> Result<&MsgRing<D>> {
        self.flow.get(flowid as usize).ok_or(Error::InvalidArgument)
    }

    /// 为流环分配 DMA 缓冲，返回设备地址（由上层经创建消息告知固件）
    pub fn flowring_create(&self, dev: &PcieDev<D>, flowid: u16) -> Result<u64> {
        let ring = self.flowring(flowid)?;
        if ring.is_active() {
            return Err(Error::Busy);
        }
        ring.setup(dev, None, regs::FLOWRING_MAX_ITEM, regs::FLOWRING_ITEMSIZE)
    }

    pub fn flowring_delete(&self, flowid: u16) -> Result<()> {
        let ring = self.flowring(flowid)?;
        ring.release();
        log::debug!(target: "brcmfmac::pcie", "flowring {} deleted", flowid);
        Ok(())
    }
}
