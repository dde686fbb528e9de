//! EROM 扫描：解析动态协议背板的核心描述表
//!
//! 描述表由 32 位描述符组成：组件描述符（成对出现）、主端口描述符、地址描述符，以 EOT 结束。
//! 每个带 wrapper 的组件（或 PMU / GCI）产出一个 [`Core`]，取其首个 4K/8K 从端口作为寄存器基址、
//! 首个对应类型的 wrapper 端口作为 wrapper 基址。

use alloc::vec::Vec;

use bus::{Error, Result};

use crate::regs::core_id;
use crate::{BuscoreOps, Core};

const DESC_TYPE_MSK: u32 = 0x0000_000F;
const DESC_VALID: u32 = 0x0000_0001;
const DESC_COMPONENT: u32 = 0x0000_0001;
const DESC_MASTER_PORT: u32 = 0x0000_0003;
const DESC_ADDRESS: u32 = 0x0000_0005;
const DESC_ADDRSIZE_GT32: u32 = 0x0000_0008;
const DESC_EOT: u32 = 0x0000_000F;

const COMP_PARTNUM: u32 = 0x000F_FF00;
const COMP_PARTNUM_S: u32 = 8;
const COMP_REVISION: u32 = 0xFF00_0000;
const COMP_REVISION_S: u32 = 24;
const COMP_NUM_SWRAP: u32 = 0x00F8_0000;
const COMP_NUM_SWRAP_S: u32 = 19;
const COMP_NUM_MWRAP: u32 = 0x0007_C000;
const COMP_NUM_MWRAP_S: u32 = 14;

const SLAVE_ADDR_BASE: u32 = 0xFFFF_F000;
const SLAVE_TYPE: u32 = 0x0000_00C0;
const SLAVE_TYPE_S: u32 = 6;
const SLAVE_TYPE_SLAVE: u32 = 0;
const SLAVE_TYPE_SWRAP: u32 = 2;
const SLAVE_TYPE_MWRAP: u32 = 3;
const SLAVE_SIZE_TYPE: u32 = 0x0000_0030;
const SLAVE_SIZE_TYPE_S: u32 = 4;

/// 地址描述符的区域大小类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Size4K,
    Size8K,
    Size16K,
    /// 大小由后续描述符给出
    Explicit,
}

impl SizeClass {
    fn from_desc(val: u32) -> Self {
        match (val & SLAVE_SIZE_TYPE) >> SLAVE_SIZE_TYPE_S {
            0 => SizeClass::Size4K,
            1 => SizeClass::Size8K,
            2 => SizeClass::Size16K,
            _ => SizeClass::Explicit,
        }
    }
}

/// 描述表游标，防止损坏的表导致死循环
struct Cursor<'a, O: ?Sized> {
    ops: &'a O,
    addr: u32,
    reads: u32,
}

/// 单个描述表的最大描述符数
const MAX_EROM_ENTRIES: u32 = 4096;

impl<'a, O: BuscoreOps + ?Sized> Cursor<'a, O> {
    /// 读下一个描述符，返回 (原值, 归一化类型)
    fn next(&mut self) -> Result<(u32, u32)> {
        if self.reads >= MAX_EROM_ENTRIES {
            log::error!(target: "brcmfmac::chip", "EROM has no end marker");
            return Err(Error::WrongType);
        }
        let val = self.ops.read32(self.addr)?;
        self.addr = self.addr.wrapping_add(4);
        self.reads += 1;
        let mut ty = val & DESC_TYPE_MSK;
        if ty & !DESC_ADDRSIZE_GT32 == DESC_ADDRESS {
            ty = DESC_ADDRESS;
        }
        Ok((val, ty))
    }

    fn back(&mut self) {
        self.addr = self.addr.wrapping_sub(4);
    }

    /// 跳过无效描述符，直到有效组件描述符或 EOT
    fn next_valid(&mut self) -> Result<u32> {
        loop {
            let (val, _) = self.next()?;
            if val & DESC_VALID == 0 {
                continue;
            }
            return Ok(val);
        }
    }
}

/// 解析一个组件的寄存器与 wrapper 基址；组件没有可用地址描述符时返回 None
fn get_regaddr<O: BuscoreOps + ?Sized>(cur: &mut Cursor<'_, O>) -> Result<Option<(u32, u32)>> {
    let (_, ty) = cur.next()?;
    let wraptype = if ty == DESC_MASTER_PORT {
        SLAVE_TYPE_MWRAP
    } else if ty == DESC_ADDRESS {
        cur.back();
        SLAVE_TYPE_SWRAP
    } else {
        cur.back();
        return Ok(None);
    };

    let mut regbase = 0u32;
    let mut wrapbase = 0u32;
    while regbase == 0 || wrapbase == 0 {
        let (val, ty) = loop {
            let (val, ty) = cur.next()?;
            if ty == DESC_EOT {
                cur.back();
                return Ok(None);
            }
            if ty == DESC_ADDRESS || ty == DESC_COMPONENT {
                break (val, ty);
            }
        };
        if ty == DESC_COMPONENT {
            cur.back();
            return Ok(Some((regbase, wrapbase)));
        }
        if val & DESC_ADDRSIZE_GT32 != 0 {
            cur.next()?;
        }
        let size = SizeClass::from_desc(val);
        if size == SizeClass::Explicit {
            let (szdesc, _) = cur.next()?;
            if szdesc & DESC_ADDRSIZE_GT32 != 0 {
                cur.next()?;
            }
        }
        if size != SizeClass::Size4K && size != SizeClass::Size8K {
            continue;
        }
        let stype = (val & SLAVE_TYPE) >> SLAVE_TYPE_S;
        if regbase == 0 && stype == SLAVE_TYPE_SLAVE {
            regbase = val & SLAVE_ADDR_BASE;
        }
        if wrapbase == 0 && stype == wraptype {
            wrapbase = val & SLAVE_ADDR_BASE;
        }
    }
    Ok(Some((regbase, wrapbase)))
}

/// 从 `erom_addr` 开始扫描描述表，返回合格核心列表（按表中顺序）
pub fn erom_scan<O: BuscoreOps + ?Sized>(ops: &O, erom_addr: u32) -> Result<Vec<Core>> {
    let mut cur = Cursor {
        ops,
        addr: erom_addr,
        reads: 0,
    };
    let mut cores = Vec::new();
    loop {
        let val = cur.next_valid()?;
        let ty = val & DESC_TYPE_MSK;
        if ty == DESC_EOT {
            break;
        }
        if ty != DESC_COMPONENT {
            continue;
        }
        let id = ((val & COMP_PARTNUM) >> COMP_PARTNUM_S) as u16;

        let (val, _) = cur.next()?;
        if val & DESC_TYPE_MSK != DESC_COMPONENT {
            log::error!(target: "brcmfmac::chip", "EROM: component {:#x} lacks second descriptor", id);
            return Err(Error::BadFrame);
        }
        let nmw = (val & COMP_NUM_MWRAP) >> COMP_NUM_MWRAP_S;
        let nsw = (val & COMP_NUM_SWRAP) >> COMP_NUM_SWRAP_S;
        let rev = ((val & COMP_REVISION) >> COMP_REVISION_S) as u8;

        if nmw + nsw == 0 && id != core_id::PMU && id != core_id::GCI {
            continue;
        }
        let Some((base, wrap)) = get_regaddr(&mut cur)? else {
            continue;
        };
        log::debug!(
            target: "brcmfmac::chip",
            "core {:#05x} rev {} base {:#010x} wrap {:#010x}",
            id, rev, base, wrap
        );
        cores.push(Core {
            id,
            rev,
            base,
            wrapbase: wrap,
        });
    }
    Ok(cores)
}
