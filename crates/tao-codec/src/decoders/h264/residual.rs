//! H.264 残差重建.
//!
//! 包含按缩放矩阵的反量化 (8.5.9), 亮度 DC 4x4 / 色度 DC 2x2 反 Hadamard,
//! 4x4 反整数变换以及残差叠加.

use super::common::clip_u8;

// ============================================================
// 缩放矩阵序号
// ============================================================

/// 分量 (0=Y, 1=Cb, 2=Cr) 对应的缩放矩阵序号
pub(super) fn scaling_list_index(intra: bool, comp: usize) -> usize {
    if intra { comp } else { 3 + comp }
}

// ============================================================
// 反量化
// ============================================================

/// 反量化器, 预先计算 LevelScale4x4 = weightScale * normAdjust
#[derive(Debug, Clone)]
pub(super) struct Dequantizer {
    /// [矩阵序号][qP % 6][光栅位置]
    level_scale: [[[i32; 16]; 6]; 6],
}

impl Dequantizer {
    /// 由 6 个光栅顺序的 4x4 缩放矩阵构造
    pub(super) fn new(lists: &[[u8; 16]; 6]) -> Self {
        let mut level_scale = [[[0i32; 16]; 6]; 6];
        for (list, table) in level_scale.iter_mut().enumerate() {
            for (rem, row) in table.iter_mut().enumerate() {
                for (pos, ls) in row.iter_mut().enumerate() {
                    let norm = NORM_ADJUST[rem][scale_class(pos)];
                    *ls = i32::from(lists[list][pos]) * norm;
                }
            }
        }
        Self { level_scale }
    }

    /// 平坦矩阵 (全部为 16)
    #[cfg(test)]
    pub(super) fn flat() -> Self {
        Self::new(&[[16; 16]; 6])
    }

    /// Intra16x16 亮度 DC 反量化, 输入为 Hadamard 之后的结果
    pub(super) fn luma_dc(&self, coeffs: &mut [i32; 16], qp: i32, list: usize) {
        let per = qp / 6;
        let ls = self.level_scale[list][(qp % 6) as usize][0];
        for c in coeffs.iter_mut() {
            *c = if qp >= 36 {
                (*c * ls) << (per - 6)
            } else {
                (*c * ls + (1 << (5 - per))) >> (6 - per)
            };
        }
    }

    /// 色度 DC 反量化 (4:2:0), 输入为 Hadamard 之后的结果
    pub(super) fn chroma_dc(&self, coeffs: &mut [i32; 4], qp: i32, list: usize) {
        let per = qp / 6;
        let ls = self.level_scale[list][(qp % 6) as usize][0];
        for c in coeffs.iter_mut() {
            *c = ((*c * ls) << per) >> 5;
        }
    }

    /// 4x4 块反量化, `skip_dc` 时保留位置 0 (已由 DC 路径给出)
    pub(super) fn ac(&self, coeffs: &mut [i32; 16], qp: i32, list: usize, skip_dc: bool) {
        let per = qp / 6;
        let scale = &self.level_scale[list][(qp % 6) as usize];
        let start = usize::from(skip_dc);
        for (pos, c) in coeffs.iter_mut().enumerate().skip(start) {
            if *c == 0 {
                continue;
            }
            *c = if qp >= 24 {
                (*c * scale[pos]) << (per - 4)
            } else {
                (*c * scale[pos] + (1 << (3 - per))) >> (4 - per)
            };
        }
    }
}

/// 4x4 光栅位置 → normAdjust 列: 0=偶行偶列, 1=奇行奇列, 2=其余
fn scale_class(pos: usize) -> usize {
    let r = (pos >> 2) & 1;
    let c = pos & 1;
    match (r, c) {
        (0, 0) => 0,
        (1, 1) => 1,
        _ => 2,
    }
}

// ============================================================
// 反变换
// ============================================================

/// 4x4 亮度 DC 反 Hadamard 变换 (Intra16x16), 输入输出均为光栅顺序
pub(super) fn inverse_hadamard_4x4(block: &mut [i32; 16]) {
    let mut temp = [0i32; 16];

    // 行变换
    for i in 0..4 {
        let s = i * 4;
        let a = block[s] + block[s + 2];
        let b = block[s] - block[s + 2];
        let c = block[s + 1] - block[s + 3];
        let d = block[s + 1] + block[s + 3];
        temp[s] = a + d;
        temp[s + 1] = b + c;
        temp[s + 2] = b - c;
        temp[s + 3] = a - d;
    }

    // 列变换
    for j in 0..4 {
        let a = temp[j] + temp[8 + j];
        let b = temp[j] - temp[8 + j];
        let c = temp[4 + j] - temp[12 + j];
        let d = temp[4 + j] + temp[12 + j];
        block[j] = a + d;
        block[4 + j] = b + c;
        block[8 + j] = b - c;
        block[12 + j] = a - d;
    }
}

/// 2x2 色度 DC 反 Hadamard 变换, `block` 为 [c00, c01, c10, c11]
pub(super) fn inverse_hadamard_2x2(block: &mut [i32; 4]) {
    let a = block[0] + block[1];
    let b = block[0] - block[1];
    let c = block[2] + block[3];
    let d = block[2] - block[3];
    block[0] = a + c;
    block[1] = b + d;
    block[2] = a - c;
    block[3] = b - d;
}

/// 4x4 反整数变换, 结果已做 `(x + 32) >> 6` 归一化
pub(super) fn idct_4x4(coeffs: &[i32; 16], out: &mut [i32; 16]) {
    let mut temp = [0i32; 16];

    // 行变换
    for i in 0..4 {
        let s = i * 4;
        let e0 = coeffs[s] + coeffs[s + 2];
        let e1 = coeffs[s] - coeffs[s + 2];
        let e2 = (coeffs[s + 1] >> 1) - coeffs[s + 3];
        let e3 = coeffs[s + 1] + (coeffs[s + 3] >> 1);
        temp[s] = e0 + e3;
        temp[s + 1] = e1 + e2;
        temp[s + 2] = e1 - e2;
        temp[s + 3] = e0 - e3;
    }

    // 列变换
    for j in 0..4 {
        let e0 = temp[j] + temp[8 + j];
        let e1 = temp[j] - temp[8 + j];
        let e2 = (temp[4 + j] >> 1) - temp[12 + j];
        let e3 = temp[4 + j] + (temp[12 + j] >> 1);
        out[j] = (e0 + e3 + 32) >> 6;
        out[4 + j] = (e1 + e2 + 32) >> 6;
        out[8 + j] = (e1 - e2 + 32) >> 6;
        out[12 + j] = (e0 - e3 + 32) >> 6;
    }
}

/// 对已反量化的系数做反变换并叠加到预测样本上
///
/// 全零块直接跳过; 只有 DC 时走快速路径, 结果与完整变换一致.
pub(super) fn add_residual_4x4(plane: &mut [u8], stride: usize, x0: usize, y0: usize, coeffs: &[i32; 16]) {
    if coeffs.iter().all(|&c| c == 0) {
        return;
    }
    let mut residual = [0i32; 16];
    if coeffs[1..].iter().all(|&c| c == 0) {
        residual.fill((coeffs[0] + 32) >> 6);
    } else {
        idct_4x4(coeffs, &mut residual);
    }
    for y in 0..4 {
        let row = (y0 + y) * stride + x0;
        let Some(dst) = plane.get_mut(row..row + 4) else {
            return;
        };
        for (x, px) in dst.iter_mut().enumerate() {
            *px = clip_u8(i32::from(*px) + residual[y * 4 + x]);
        }
    }
}

// ============================================================
// 量化参数表
// ============================================================

/// normAdjust4x4 (8-315): [qP % 6][v0, v1, v2]
#[rustfmt::skip]
const NORM_ADJUST: [[i32; 3]; 6] = [
    [10, 16, 13],
    [11, 18, 14],
    [13, 20, 16],
    [14, 23, 18],
    [16, 25, 20],
    [18, 29, 23],
];

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_INTRA_Y: usize = 0;
    const LIST_INTER_Y: usize = 3;

    #[test]
    fn test_flat_ac_dequant_matches_level_scale() {
        let deq = Dequantizer::flat();
        let mut coeffs = [0i32; 16];
        coeffs[0] = 1;
        coeffs[1] = 1;
        coeffs[5] = 1;
        // qp=28: per=4, rem=4 → v0=16, v2=20, v1=25
        deq.ac(&mut coeffs, 28, LIST_INTRA_Y, false);
        assert_eq!(coeffs[0], 16 * 16);
        assert_eq!(coeffs[1], 20 * 16);
        assert_eq!(coeffs[5], 25 * 16);

        // qp=10: per=1, 需要舍入右移 3 位
        let mut low = [0i32; 16];
        low[0] = 3;
        deq.ac(&mut low, 10, LIST_INTRA_Y, false);
        assert_eq!(low[0], (3 * 16 * 16 + 4) >> 3);
    }

    #[test]
    fn test_ac_dequant_keeps_dc_when_requested() {
        let deq = Dequantizer::flat();
        let mut coeffs = [7i32; 16];
        deq.ac(&mut coeffs, 30, LIST_INTER_Y, true);
        assert_eq!(coeffs[0], 7, "DC 位置应保持不变");
        assert_ne!(coeffs[1], 7);
    }

    #[test]
    fn test_scaling_matrix_changes_level_scale() {
        let mut lists = [[16u8; 16]; 6];
        lists[LIST_INTER_Y][0] = 32;
        let deq = Dequantizer::new(&lists);
        let mut coeffs = [0i32; 16];
        coeffs[0] = 1;
        deq.ac(&mut coeffs, 24, LIST_INTER_Y, false);
        // per=4, rem=0: 32 * 10
        assert_eq!(coeffs[0], 320);
        let mut intra = [0i32; 16];
        intra[0] = 1;
        deq.ac(&mut intra, 24, LIST_INTRA_Y, false);
        assert_eq!(intra[0], 160, "帧内矩阵保持平坦");
        assert_eq!(scaling_list_index(false, 2), 5);
    }

    #[test]
    fn test_luma_dc_dequant_both_branches() {
        let deq = Dequantizer::flat();
        let mut high = [1i32; 16];
        deq.luma_dc(&mut high, 36, LIST_INTRA_Y);
        assert_eq!(high[0], 160);
        let mut low = [4i32; 16];
        deq.luma_dc(&mut low, 12, LIST_INTRA_Y);
        // per=2: (4*160 + 8) >> 4
        assert_eq!(low[0], (4 * 160 + 8) >> 4);
    }

    #[test]
    fn test_chroma_dc_hadamard_is_raster_ordered() {
        let mut block = [1, 2, 3, 4];
        inverse_hadamard_2x2(&mut block);
        // f00=10, f01=c0-c1+c2-c3=-2, f10=c0+c1-c2-c3=-4, f11=0
        assert_eq!(block, [10, -2, -4, 0]);
        let deq = Dequantizer::flat();
        let mut dc = [32, 0, 0, 0];
        deq.chroma_dc(&mut dc, 6, 1);
        assert_eq!(dc[0], ((32 * 160) << 1) >> 5);
    }

    #[test]
    fn test_luma_hadamard_of_single_dc() {
        let mut block = [0i32; 16];
        block[0] = 5;
        inverse_hadamard_4x4(&mut block);
        assert!(block.iter().all(|&v| v == 5), "单一 DC 应均匀分布");
    }

    #[test]
    fn test_idct_dc_only_matches_fast_path() {
        let mut coeffs = [0i32; 16];
        coeffs[0] = 200;
        let mut out = [0i32; 16];
        idct_4x4(&coeffs, &mut out);
        assert!(out.iter().all(|&v| v == (200 + 32) >> 6));

        let mut plane = vec![100u8; 16];
        add_residual_4x4(&mut plane, 4, 0, 0, &coeffs);
        assert!(plane.iter().all(|&v| v == 103));
    }

    #[test]
    fn test_add_residual_clips() {
        let mut coeffs = [0i32; 16];
        coeffs[0] = -64 * 200;
        coeffs[1] = 64;
        let mut plane = vec![10u8; 16];
        add_residual_4x4(&mut plane, 4, 0, 0, &coeffs);
        assert!(plane.iter().all(|&v| v == 0), "结果应钳位到 0");
    }
}
