//! 比特流读取器.
//!
//! 从 RBSP 字节缓冲区中按位读取数据, 大端位序 (MSB first).
//! 除定长读取外还提供 H.264 语法描述符 `ue(v)`/`se(v)`/`te(v)` 以及 `more_rbsp_data()`.
//!
//! 任何越过缓冲区末尾的读取都返回 `TaoError::Eof`, 不会 panic.

use crate::{TaoError, TaoResult};

/// Exp-Golomb 前导零上限, 超过即视为码流损坏
const MAX_EXP_GOLOMB_LEADING_ZEROS: u32 = 31;

/// 比特流读取器
///
/// # 示例
/// ```
/// use tao_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// 获取已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        if self.byte_pos >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_pos) * 8 - self.bit_pos as usize
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> TaoResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(TaoError::Eof);
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(u32::from(bit))
    }

    /// 读取 1 位标志 `u(1)`
    pub fn read_flag(&mut self) -> TaoResult<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// 读取 N 个位 (最多 32 位)
    pub fn read_bits(&mut self, n: u32) -> TaoResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(TaoError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(TaoError::Eof);
        }

        let mut result: u32 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u32::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }

        Ok(result)
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&self, n: u32) -> TaoResult<u32> {
        let mut probe = self.clone();
        probe.read_bits(n)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) -> TaoResult<()> {
        if n > self.bits_left() {
            return Err(TaoError::Eof);
        }

        let total_bits = self.bit_pos as usize + n;
        self.byte_pos += total_bits / 8;
        self.bit_pos = (total_bits % 8) as u8;

        Ok(())
    }

    /// 无符号 Exp-Golomb `ue(v)`
    pub fn read_ue(&mut self) -> TaoResult<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > MAX_EXP_GOLOMB_LEADING_ZEROS {
                return Err(TaoError::InvalidData(format!(
                    "Exp-Golomb 前导零过多, leading_zeros={}",
                    leading_zeros
                )));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        let value = ((1u64 << leading_zeros) - 1) + u64::from(suffix);
        u32::try_from(value)
            .map_err(|_| TaoError::InvalidData(format!("ue(v) 溢出, value={}", value)))
    }

    /// 有符号 Exp-Golomb `se(v)`
    pub fn read_se(&mut self) -> TaoResult<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code & 1 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        Ok(value as i32)
    }

    /// 截断 Exp-Golomb `te(v)`, `max` 为语法元素的取值上限
    pub fn read_te(&mut self, max: u32) -> TaoResult<u32> {
        match max {
            0 => Ok(0),
            1 => Ok(1 - self.read_bit()?),
            _ => self.read_ue(),
        }
    }

    /// 是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事.
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 当前位置之后是否仍有 `rbsp_stop_one_bit` 之前的有效数据
    pub fn more_rbsp_data(&self) -> bool {
        let Some(last_byte_idx) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };
        let stop_bit_offset = self.data[last_byte_idx].trailing_zeros() as usize;
        let stop_bit_pos = last_byte_idx * 8 + (7 - stop_bit_offset);
        self.bits_read() < stop_bit_pos
    }

    /// 获取当前字节位置
    pub fn byte_position(&self) -> usize {
        self.byte_pos
    }

    /// 从当前位置读取原始字节切片
    ///
    /// 仅在字节对齐时可用.
    pub fn read_bytes(&mut self, n: usize) -> TaoResult<&'a [u8]> {
        if self.bit_pos != 0 {
            return Err(TaoError::InvalidArgument("read_bytes 需要字节对齐".into()));
        }

        let end = self.byte_pos + n;
        if end > self.data.len() {
            return Err(TaoError::Eof);
        }

        let slice = &self.data[self.byte_pos..end];
        self.byte_pos = end;
        Ok(slice)
    }

    /// 获取底层数据的引用
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}
