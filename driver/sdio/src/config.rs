//! SDIO 传输可调参数

/// 保存/恢复模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrMode {
    /// 芯片支持时启用
    Auto,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct SdioConfig {
    /// F1 块大小
    pub f1_blocksize: u16,
    /// F2 块大小
    pub f2_blocksize: u16,
    /// 每次 DPC 最多收的帧数
    pub rxbound: u32,
    /// 每次 DPC 最多发的帧数
    pub txbound: u32,
    /// 收包未完成时每次 DPC 最多发的帧数
    pub txminmax: u32,
    pub txglom: bool,
    /// 单次发送聚合的最大帧数
    pub txglomsize: u8,
    /// 聚合子帧长度对齐
    pub txglom_align: usize,
    /// DMA 起始地址对齐
    pub head_align: usize,
    /// 无中断线时用看门狗轮询
    pub poll: bool,
    pub poll_interval_ms: u32,
    /// 空闲多少个看门狗周期后关时钟；0 不关
    pub idle_time: u32,
    pub watchdog_ms: u32,
    /// 控制帧等待上限
    pub ctrl_timeout_ms: u32,
    pub ctrl_retries: u32,
    pub sr: SrMode,
    /// 固件控制台轮询间隔；0 关闭
    pub console_interval_ms: u32,
}

impl Default for SdioConfig {
    fn default() -> Self {
        Self {
            f1_blocksize: 64,
            f2_blocksize: 512,
            rxbound: 50,
            txbound: 20,
            txminmax: 1,
            txglom: true,
            txglomsize: 32,
            txglom_align: 4,
            head_align: 4,
            poll: false,
            poll_interval_ms: 10,
            idle_time: 2,
            watchdog_ms: 10,
            ctrl_timeout_ms: 2000,
            ctrl_retries: 3,
            sr: SrMode::Auto,
            console_interval_ms: 0,
        }
    }
}

impl SdioConfig {
    /// 轮询节拍：每多少个看门狗周期查一次中断
    pub(crate) fn pollrate(&self) -> u32 {
        (self.poll_interval_ms / self.watchdog_ms.max(1)).max(1)
    }
}
