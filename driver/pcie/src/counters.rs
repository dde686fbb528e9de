//! 诊断计数（只用于观测，不参与控制流）

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PcieCounters {
    /// 快速检查发现的中断
    pub intrcount: u32,
    /// 快速检查读到 0 的次数
    pub spurious: u32,
    pub doorbells: u32,
    pub mb_data_rx: u32,
    pub mb_data_tx: u32,
    pub d3_acks: u32,
    pub ds_enter_reqs: u32,
    pub fw_halts: u32,
    pub h2d_items: u32,
    pub d2h_items: u32,
    /// 环满时被拒绝的提交
    pub ring_full: u32,
    pub console_lines: u32,
}
