//! 固件控制台：设备内存中的字符环，按行输出到日志
//!
//! 设备只推进写下标；主机记录已读位置，从读位置逐字节取到写位置，遇 `\n` 输出一行。
//! 行尾 `\r` 丢弃；超过 [`CONSOLE_LINE_MAX`] 的行强制折行。不完整的行留到下次。

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// 单行最大长度（含结尾）
pub const CONSOLE_LINE_MAX: usize = 192;

#[derive(Debug, Default)]
pub struct ConsoleLines {
    read_idx: u32,
    line: Vec<u8>,
}

impl ConsoleLines {
    pub const fn new() -> Self {
        Self {
            read_idx: 0,
            line: Vec::new(),
        }
    }

    pub fn read_idx(&self) -> u32 {
        self.read_idx
    }

    /// 固件重启后环被重建，丢弃未完成的行
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.line.clear();
    }

    /// 从读位置消费到 `write_idx`，`byte_at(i)` 取环内第 i 字节；返回输出的行数
    pub fn consume(
        &mut self,
        write_idx: u32,
        bufsize: u32,
        mut byte_at: impl FnMut(u32) -> Result<u8>,
        mut emit: impl FnMut(&str),
    ) -> Result<usize> {
        if bufsize == 0 || write_idx >= bufsize {
            return Err(Error::BadFrame);
        }
        if self.read_idx >= bufsize {
            self.reset();
        }
        let mut lines = 0;
        while self.read_idx != write_idx {
            let ch = byte_at(self.read_idx)?;
            self.read_idx += 1;
            if self.read_idx == bufsize {
                self.read_idx = 0;
            }
            if ch == b'\r' {
                continue;
            }
            if ch == b'\n' {
                emit(&String::from_utf8_lossy(&self.line));
                self.line.clear();
                lines += 1;
                continue;
            }
            self.line.push(ch);
            if self.line.len() == CONSOLE_LINE_MAX - 2 {
                emit(&String::from_utf8_lossy(&self.line));
                self.line.clear();
                lines += 1;
            }
        }
        Ok(lines)
    }
}

/// 默认输出：固件日志
pub fn log_console_line(line: &str) {
    log::info!(target: "brcmfmac::fwcon", "CONSOLE: {}", line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;
    use std::vec;

    fn ring(text: &[u8], size: usize) -> Vec<u8> {
        let mut v = vec![0u8; size];
        v[..text.len()].copy_from_slice(text);
        v
    }

    #[test]
    fn emits_complete_lines_only() {
        let buf = ring(b"boot ok\r\nwl0: up\npart", 64);
        let mut c = ConsoleLines::new();
        let mut out = Vec::new();
        let n = c
            .consume(21, 64, |i| Ok(buf[i as usize]), |l| out.push(l.to_string()))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, ["boot ok", "wl0: up"]);
        assert_eq!(c.read_idx(), 21);

        let buf = ring(b"boot ok\r\nwl0: up\npartial\n", 64);
        c.consume(25, 64, |i| Ok(buf[i as usize]), |l| out.push(l.to_string()))
            .unwrap();
        assert_eq!(out.last().map(String::as_str), Some("partial"));
    }

    #[test]
    fn wraps_at_ring_end() {
        let mut buf = ring(b"hello\n", 8);
        let mut c = ConsoleLines::new();
        let mut out = Vec::new();
        c.consume(6, 8, |i| Ok(buf[i as usize]), |l| out.push(l.to_string()))
            .unwrap();
        buf[6..8].copy_from_slice(b"ab");
        buf[0..2].copy_from_slice(b"c\n");
        c.consume(2, 8, |i| Ok(buf[i as usize]), |l| out.push(l.to_string()))
            .unwrap();
        assert_eq!(out, ["hello", "abc"]);
    }

    #[test]
    fn long_line_is_split() {
        let buf = vec![b'x'; 400];
        let mut c = ConsoleLines::new();
        let mut out = Vec::new();
        c.consume(399, 400, |i| Ok(buf[i as usize]), |l| out.push(l.len()))
            .unwrap();
        assert_eq!(out, [CONSOLE_LINE_MAX - 2, CONSOLE_LINE_MAX - 2]);
    }

    #[test]
    fn rejects_corrupt_index() {
        let mut c = ConsoleLines::new();
        assert_eq!(c.consume(9, 8, |_| Ok(0), |_| {}), Err(Error::BadFrame));
    }
}
