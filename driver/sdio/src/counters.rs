//! 诊断计数（只用于观测，不参与控制流）

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SdioCounters {
    /// 中断次数
    pub intrcount: u32,
    pub lastintrs: u32,
    /// 轮询发现的中断
    pub pollcnt: u32,
    pub tx_frames: u32,
    pub tx_glom_frames: u32,
    pub tx_ctlpkts: u32,
    pub tx_ctlerrs: u32,
    pub tx_ctl_retries: u32,
    pub tx_sderrs: u32,
    pub fcqueued: u32,
    pub rx_frames: u32,
    pub rx_ctlpkts: u32,
    pub rx_ctlerrs: u32,
    pub rxc_errors: u32,
    /// 收到的聚合帧（子帧数）
    pub rx_glom_frames: u32,
    pub rx_glomfail: u32,
    pub rx_glom_descs: u32,
    /// 头部校验和错误
    pub checksum_errors: u32,
    /// 长度、偏移、通道不合法
    pub rx_badhdr: u32,
    pub rx_badseq: u32,
    pub rx_hdrfail: u32,
    /// 发出的 NAK 数
    pub rx_rtx: u32,
    pub rx_toolong: u32,
    pub rx_readahead: u32,
    pub rx_readahead_mismatch: u32,
    pub f2rxhdrs: u32,
    pub f2rxdata: u32,
    pub f2txdata: u32,
    pub f1regdata: u32,
    pub fc_rcvd: u32,
    pub fc_xoff: u32,
    pub fc_xon: u32,
}
