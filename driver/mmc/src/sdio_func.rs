//! SDIO Function 抽象
//!
//! 由宿主 SDIO 栈实现；传输层只通过本 trait 访问硬件。
//! 地址均为 function 内 17 位地址；错误沿用 errno 风格 `i32`（-123 表示介质消失）。

use crate::types::SdioDeviceId;

/// SDIO 中断回调
pub type SdioIrqHandler = fn();

/// SDIO Function 设备接口
pub trait SdioFunc {
    /// Function 号（1..7）
    fn num(&self) -> u8;

    fn vendor(&self) -> u16;

    fn device(&self) -> u16;

    /// 当前块大小
    fn cur_blksize(&self) -> u16;

    /// 独占宿主总线；与 [`SdioFunc::release_host`] 成对
    fn claim_host(&self) {}

    fn release_host(&self) {}

    /// 单字节读（CMD52）
    fn readb(&self, addr: u32) -> Result<u8, i32>;

    /// 单字节写（CMD52）
    fn writeb(&self, addr: u32, b: u8) -> Result<(), i32>;

    /// 16 位读（CMD53 递增地址），小端
    fn readw(&self, addr: u32) -> Result<u16, i32> {
        let mut b = [0u8; 2];
        self.read_incr(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn writew(&self, addr: u32, v: u16) -> Result<(), i32> {
        self.write_incr(addr, &v.to_le_bytes())
    }

    /// 32 位读（CMD53 递增地址），小端
    fn readl(&self, addr: u32) -> Result<u32, i32> {
        let mut b = [0u8; 4];
        self.read_incr(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn writel(&self, addr: u32, v: u32) -> Result<(), i32> {
        self.write_incr(addr, &v.to_le_bytes())
    }

    /// F0（CCCR）单字节读；默认 ENOSYS
    fn read_f0(&self, _reg: u8) -> Result<u8, i32> {
        Err(-38)
    }

    /// F0（CCCR）单字节写；默认 ENOSYS
    fn write_f0(&self, _reg: u8, _val: u8) -> Result<(), i32> {
        Err(-38)
    }

    /// 固定地址块读（FIFO）
    fn read_fifo(&self, addr: u32, buf: &mut [u8]) -> Result<(), i32>;

    /// 固定地址块写（FIFO）
    fn write_fifo(&self, addr: u32, buf: &[u8]) -> Result<(), i32>;

    /// 递增地址块读
    fn read_incr(&self, addr: u32, buf: &mut [u8]) -> Result<(), i32>;

    /// 递增地址块写
    fn write_incr(&self, addr: u32, buf: &[u8]) -> Result<(), i32>;

    /// 单次散列传输最多支持的段数；0 表示不支持散列传输
    fn max_segs(&self) -> usize {
        0
    }

    /// 单次散列读：一个 CMD53 序列填充多个目标缓冲
    fn read_sg(&self, _addr: u32, _fifo: bool, _segs: &mut [&mut [u8]]) -> Result<(), i32> {
        Err(-95)
    }

    /// 单次散列写
    fn write_sg(&self, _addr: u32, _fifo: bool, _segs: &[&[u8]]) -> Result<(), i32> {
        Err(-95)
    }

    fn set_block_size(&self, blksz: u16) -> Result<(), i32>;

    /// 使能该 function（CCCR IO_ENABLE + 等 IO_READY）
    fn enable_func(&self) -> Result<(), i32>;

    fn disable_func(&self) -> Result<(), i32>;

    /// 注册 SDIO 中断；无中断线时可为空实现，由轮询替代
    fn claim_irq(&self, _handler: SdioIrqHandler) -> Result<(), i32> {
        Ok(())
    }

    fn release_irq(&self) -> Result<(), i32> {
        Ok(())
    }

    /// 按块大小向上取整
    fn align_size(&self, sz: usize) -> usize {
        let blk = self.cur_blksize() as usize;
        if blk == 0 {
            return sz;
        }
        sz.div_ceil(blk) * blk
    }

    fn device_id(&self) -> SdioDeviceId {
        SdioDeviceId::new(self.vendor(), self.device())
    }
}

/// 持有宿主总线期间的 guard，drop 时释放
pub struct HostClaim<'a, F: SdioFunc + ?Sized> {
    func: &'a F,
}

impl<'a, F: SdioFunc + ?Sized> HostClaim<'a, F> {
    pub fn new(func: &'a F) -> Self {
        func.claim_host();
        Self { func }
    }
}

impl<F: SdioFunc + ?Sized> Drop for HostClaim<'_, F> {
    fn drop(&mut self) {
        self.func.release_host();
    }
}

/// 在持宿主总线时执行闭包
pub fn with_host_claimed<F: SdioFunc + ?Sized, R>(func: &F, f: impl FnOnce() -> R) -> R {
    let _claim = HostClaim::new(func);
    f()
}
