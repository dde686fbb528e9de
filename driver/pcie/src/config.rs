//! PCIe 传输可调参数

#[derive(Debug, Clone)]
pub struct PcieConfig {
    /// 等待固件写出共享结构地址的轮询次数
    pub ready_retries: u32,
    pub ready_interval_ms: u32,
    /// 等待设备取走邮箱数据的轮询次数
    pub mbdata_retries: u32,
    pub mbdata_interval_ms: u32,
    /// 等待 D3 应答上限
    pub d3_ack_timeout_ms: u32,
    /// 控制消息等待上限
    pub ctrl_timeout_ms: u32,
    /// 中断处理后读取固件控制台
    pub console: bool,
    /// 固件支持时把环下标放在主机 DMA 缓冲里
    pub dma_index: bool,
}

impl Default for PcieConfig {
    fn default() -> Self {
        Self {
            ready_retries: 100,
            ready_interval_ms: 10,
            mbdata_retries: 100,
            mbdata_interval_ms: 10,
            d3_ack_timeout_ms: 2000,
            ctrl_timeout_ms: 2000,
            console: false,
            dma_index: true,
        }
    }
}
