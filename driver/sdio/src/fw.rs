//! 固件与 NVRAM 下载
//!
//! 下载在 CPU 停住、只有 ALP 时钟时进行：固件写到 RAM 起点并回读校验，NVRAM 放在 RAM 末尾，
//! 最后一个字是长度令牌；随后按复位向量启动 CPU。

use bus::{nvram_image, Error, Result};
use mmc::{with_host_claimed, SdioFunc};

use crate::bus::SdioBus;
use crate::clock::ClkState;
use crate::device::DevState;

/// 回读不一致
const EIO: i32 = -5;

impl<F: SdioFunc> SdioBus<F> {
    /// 写入固件与 NVRAM 并启动 CPU；成功后调用 `init` 进入 Data
    pub fn download(&self, fw: &[u8], nvram: &[u8]) -> Result<()> {
        self.check_present()?;
        if self.dev().state() == DevState::Data {
            return Err(Error::Busy);
        }
        let info = self.chip.info();
        let nvimg = nvram_image(nvram);
        if fw.len() < 4 || fw.len() + nvimg.len() > info.ramsize as usize {
            log::error!(
                target: "brcmfmac::sdio",
                "image does not fit: fw {} nvram {} ram {}",
                fw.len(),
                nvimg.len(),
                info.ramsize
            );
            return Err(Error::InvalidArgument);
        }
        let rstvec = u32::from_le_bytes([fw[0], fw[1], fw[2], fw[3]]);

        let mut inner = self.inner.lock();
        with_host_claimed(self.dev().func1(), || {
            inner.alp_only = true;
            let res = self.clkctl(&mut inner, ClkState::Avail, false).and_then(|_| {
                self.write_verify(info.rambase, fw)?;
                log::info!(target: "brcmfmac::sdio", "firmware {} bytes written", fw.len());
                let nvaddr = info.rambase + info.ramsize - nvimg.len() as u32;
                self.write_verify(nvaddr, &nvimg)?;
                log::debug!(target: "brcmfmac::sdio", "nvram {} bytes @ {:#x}", nvimg.len(), nvaddr);
                self.chip.set_active(rstvec)
            });
            if let Err(e) = &res {
                log::error!(target: "brcmfmac::sdio", "download failed: {}", e);
            }
            let _ = self.clkctl(&mut inner, ClkState::SdOnly, false);
            inner.alp_only = false;
            res
        })
    }

    fn write_verify(&self, addr: u32, data: &[u8]) -> Result<()> {
        let dev = self.dev();
        dev.ram_write(addr, data)?;
        if !dev.verify_ram(addr, data)? {
            return Err(Error::Io { code: EIO });
        }
        Ok(())
    }
}
