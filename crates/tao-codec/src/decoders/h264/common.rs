// ============================================================
// 工具函数
// ============================================================

pub(super) fn median3(a: i32, b: i32, c: i32) -> i32 {
    a.max(b).min(a.min(b).max(c))
}

pub(super) fn clip_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// QP 按 H.264 规则做 0..51 环绕.
pub(super) fn wrap_qp(qp: i64) -> i32 {
    let m = 52i64;
    ((qp % m + m) % m) as i32
}

/// Luma QP → Chroma QP 映射 (H.264 Table 8-15)
pub(super) fn chroma_qp_from_luma_with_offset(qp: i32, offset: i32) -> i32 {
    let qpc = (qp + offset).clamp(0, 51);
    CHROMA_QP_TABLE[qpc as usize]
}

/// 从对齐缓冲区拷贝到紧凑平面
pub(super) fn copy_plane(src: &[u8], src_stride: usize, w: usize, h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; w * h];
    for y in 0..h {
        let src_off = y * src_stride;
        let dst_off = y * w;
        let copy_len = w.min(src.len().saturating_sub(src_off));
        if copy_len > 0 && dst_off + copy_len <= dst.len() {
            dst[dst_off..dst_off + copy_len].copy_from_slice(&src[src_off..src_off + copy_len]);
        }
    }
    dst
}

/// 显式加权预测的单个样本
pub(super) fn apply_weighted_sample(sample: u8, weight: i32, offset: i32, log2_denom: u32) -> u8 {
    let scaled = i32::from(sample) * weight;
    let shifted = if log2_denom > 0 {
        (scaled + (1 << (log2_denom - 1))) >> log2_denom
    } else {
        scaled
    };
    clip_u8(shifted + offset)
}

// ============================================================
// 块索引映射
// ============================================================

/// 4x4 块解码序号 → 宏块内 (x4, y4)
pub(super) const BLK4X4_XY: [(usize, usize); 16] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (1, 1),
    (2, 0),
    (3, 0),
    (2, 1),
    (3, 1),
    (0, 2),
    (1, 2),
    (0, 3),
    (1, 3),
    (2, 2),
    (3, 2),
    (2, 3),
    (3, 3),
];

/// 宏块内光栅位置 (y4 * 4 + x4) → 4x4 块解码序号
pub(super) const RASTER_TO_BLK4X4: [usize; 16] = [0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15];

/// 4x4 zigzag 扫描位置 → 光栅索引
pub(super) const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 宏块内 (x4, y4) 对应的 4x4 块解码序号
pub(super) fn blk4x4_index(x4: usize, y4: usize) -> usize {
    RASTER_TO_BLK4X4[y4 * 4 + x4]
}

/// Chroma QP 映射表 (H.264 Table 8-15)
#[rustfmt::skip]
const CHROMA_QP_TABLE: [i32; 52] = [
     0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
    16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 29, 30,
    31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38,
    39, 39, 39, 39,
];
