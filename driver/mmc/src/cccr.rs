//! SDIO CCCR（Common I/O）访问
//!
//! F0 0x04 = INT_ENABLE，0x06 = IO_ABORT；0xF0 起为 Broadcom 私有寄存器。

/// CCCR 寄存器偏移（F0 地址）
pub const SDIO_CCCR_INT_ENABLE: u8 = 0x04;
pub const SDIO_CCCR_INT_PENDING: u8 = 0x05;
pub const SDIO_CCCR_IO_ABORT: u8 = 0x06;

/// Broadcom 私有 F0 寄存器
pub mod brcm_f0_reg {
    /// 卡能力：bit1 = CMD14 支持
    pub const SDIO_CCCR_BRCM_CARDCAP: u8 = 0xF0;
    pub const CARDCAP_CMD14_SUPPORT: u8 = 0x02;
    pub const CARDCAP_CMD14_EXT: u8 = 0x04;
    /// 卡控制：bit1 = WLAN 复位
    pub const SDIO_CCCR_BRCM_CARDCTRL: u8 = 0xF1;
    pub const CARDCTRL_WLANRESET: u8 = 0x02;
}

/// 能读写 F0（CCCR）的接口
pub trait CccrAccess {
    fn read_f0(&self, reg: u8) -> Result<u8, i32>;
    fn write_f0(&self, reg: u8, val: u8) -> Result<(), i32>;
}

/// 经某个 function 的 F0 访问 CCCR
pub struct F0Access<'a, F: ?Sized>(pub &'a F);

impl<F: crate::SdioFunc + ?Sized> CccrAccess for F0Access<'_, F> {
    fn read_f0(&self, reg: u8) -> Result<u8, i32> {
        self.0.read_f0(reg)
    }
    fn write_f0(&self, reg: u8, val: u8) -> Result<(), i32> {
        self.0.write_f0(reg, val)
    }
}

/// 中止 function 上进行中的传输（写 IO_ABORT）
pub fn sdio_abort(cccr: &dyn CccrAccess, func_num: u8) -> Result<(), i32> {
    if func_num > 7 {
        return Err(-22);
    }
    cccr.write_f0(SDIO_CCCR_IO_ABORT, func_num)
}

/// 设置中断使能：bit0 为总开关，bit n 为 function n；`mask` 为 0 时全部关闭
pub fn sdio_set_irq_mask(cccr: &dyn CccrAccess, mask: u8) -> Result<(), i32> {
    let val = if mask == 0 { 0 } else { mask | 1 };
    cccr.write_f0(SDIO_CCCR_INT_ENABLE, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[derive(Default)]
    struct FakeCccr {
        int_enable: Cell<u8>,
        abort: Cell<u8>,
    }

    impl CccrAccess for FakeCccr {
        fn read_f0(&self, reg: u8) -> Result<u8, i32> {
            match reg {
                SDIO_CCCR_INT_ENABLE => Ok(self.int_enable.get()),
                _ => Ok(0),
            }
        }
        fn write_f0(&self, reg: u8, val: u8) -> Result<(), i32> {
            match reg {
                SDIO_CCCR_INT_ENABLE => self.int_enable.set(val),
                SDIO_CCCR_IO_ABORT => self.abort.set(val),
                _ => {}
            }
            Ok(())
        }
    }

    #[test]
    fn irq_mask_sets_master_bit() {
        let c = FakeCccr::default();
        sdio_set_irq_mask(&c, 0x06).unwrap();
        assert_eq!(c.int_enable.get(), 0x07);
        sdio_set_irq_mask(&c, 0).unwrap();
        assert_eq!(c.int_enable.get(), 0);
    }

    #[test]
    fn abort_writes_function_number() {
        let c = FakeCccr::default();
        sdio_abort(&c, 2).unwrap();
        assert_eq!(c.abort.get(), 2);
        assert_eq!(sdio_abort(&c, 8), Err(-22));
    }
}
