//! H.264 帧内预测.
//!
//! 提供 Intra_4x4 (9 种模式), Intra_16x16 (4 种模式) 与色度 8x8 (4 种模式) 预测.
//! 邻居可用性由调用方按 slice 归属与 constrained_intra_pred 推导后传入;
//! 码流使用了所需邻居不可用的模式时回退为 128 填充.

/// 预测块的邻居可用性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Neighbors {
    pub left: bool,
    pub top: bool,
    pub top_left: bool,
    pub top_right: bool,
}

impl Neighbors {
    /// 宏块内 4x4 块 (x4, y4) 的邻居, `mb` 为宏块级 A/B/C/D 的可用性
    pub(super) fn for_block4x4(mb: Neighbors, x4: usize, y4: usize) -> Self {
        let left = x4 > 0 || mb.left;
        let top = y4 > 0 || mb.top;
        let top_left = match (x4 > 0, y4 > 0) {
            (true, true) => true,
            (false, true) => mb.left,
            (true, false) => mb.top,
            (false, false) => mb.top_left,
        };
        let top_right = if y4 == 0 {
            if x4 < 3 { mb.top } else { mb.top_right }
        } else if x4 < 3 {
            // 右上块必须已按解码顺序重建
            super::common::blk4x4_index(x4 + 1, y4 - 1) < super::common::blk4x4_index(x4, y4)
        } else {
            false
        };
        Self {
            left,
            top,
            top_left,
            top_right,
        }
    }
}

fn px(plane: &[u8], stride: usize, x: usize, y: usize) -> i32 {
    i32::from(plane.get(y * stride + x).copied().unwrap_or(128))
}

/// 用单一值填充矩形块
pub(super) fn fill_block(plane: &mut [u8], stride: usize, x0: usize, y0: usize, w: usize, h: usize, val: u8) {
    for dy in 0..h {
        let start = (y0 + dy) * stride + x0;
        if let Some(row) = plane.get_mut(start..start + w) {
            row.fill(val);
        }
    }
}

fn put(plane: &mut [u8], stride: usize, x: usize, y: usize, val: i32) {
    if let Some(p) = plane.get_mut(y * stride + x) {
        *p = val.clamp(0, 255) as u8;
    }
}

// ============================================================
// Intra_4x4
// ============================================================

/// 4x4 块的参考样本: edge[0..4] 为 p[-1,3..0], edge[4] 为 p[-1,-1], edge[5..13] 为 p[0..7,-1]
struct Edge4x4 {
    edge: [i32; 13],
}

impl Edge4x4 {
    fn gather(plane: &[u8], stride: usize, x0: usize, y0: usize, nb: Neighbors) -> Self {
        let mut edge = [128i32; 13];
        if nb.left {
            for y in 0..4 {
                edge[3 - y] = px(plane, stride, x0 - 1, y0 + y);
            }
        }
        if nb.top_left {
            edge[4] = px(plane, stride, x0 - 1, y0 - 1);
        }
        if nb.top {
            for x in 0..4 {
                edge[5 + x] = px(plane, stride, x0 + x, y0 - 1);
            }
            for x in 4..8 {
                edge[5 + x] = if nb.top_right {
                    px(plane, stride, x0 + x, y0 - 1)
                } else {
                    edge[8]
                };
            }
        }
        Self { edge }
    }

    /// p[x, y], 仅对 x == -1 或 y == -1 的位置有意义
    fn p(&self, x: i32, y: i32) -> i32 {
        let idx = if y < 0 { 5 + x } else { 3 - y };
        self.edge[idx.clamp(0, 12) as usize]
    }
}

/// Intra_4x4 预测 (8.3.1.2)
pub(super) fn predict_4x4(plane: &mut [u8], stride: usize, x0: usize, y0: usize, mode: u8, nb: Neighbors) {
    let needs = match mode {
        0 | 3 | 7 => nb.top,
        1 | 8 => nb.left,
        4..=6 => nb.top && nb.left && nb.top_left,
        _ => true,
    };
    if !needs || mode > 8 {
        fill_block(plane, stride, x0, y0, 4, 4, 128);
        return;
    }
    let e = Edge4x4::gather(plane, stride, x0, y0, nb);
    let p = |x: i32, y: i32| e.p(x, y);
    let dc = match (nb.left, nb.top) {
        (true, true) => ((0..4).map(|i| p(i, -1) + p(-1, i)).sum::<i32>() + 4) >> 3,
        (true, false) => ((0..4).map(|i| p(-1, i)).sum::<i32>() + 2) >> 2,
        (false, true) => ((0..4).map(|i| p(i, -1)).sum::<i32>() + 2) >> 2,
        (false, false) => 128,
    };

    for y in 0..4i32 {
        for x in 0..4i32 {
            let v = match mode {
                0 => p(x, -1),
                1 => p(-1, y),
                2 => dc,
                3 => {
                    if x == 3 && y == 3 {
                        (p(6, -1) + 3 * p(7, -1) + 2) >> 2
                    } else {
                        (p(x + y, -1) + 2 * p(x + y + 1, -1) + p(x + y + 2, -1) + 2) >> 2
                    }
                }
                4 => {
                    if x > y {
                        (p(x - y - 2, -1) + 2 * p(x - y - 1, -1) + p(x - y, -1) + 2) >> 2
                    } else if x < y {
                        (p(-1, y - x - 2) + 2 * p(-1, y - x - 1) + p(-1, y - x) + 2) >> 2
                    } else {
                        (p(0, -1) + 2 * p(-1, -1) + p(-1, 0) + 2) >> 2
                    }
                }
                5 => {
                    let z = 2 * x - y;
                    match z {
                        0 | 2 | 4 | 6 => (p(x - (y >> 1) - 1, -1) + p(x - (y >> 1), -1) + 1) >> 1,
                        1 | 3 | 5 => {
                            (p(x - (y >> 1) - 2, -1) + 2 * p(x - (y >> 1) - 1, -1) + p(x - (y >> 1), -1) + 2) >> 2
                        }
                        -1 => (p(-1, 0) + 2 * p(-1, -1) + p(0, -1) + 2) >> 2,
                        _ => (p(-1, y - 1) + 2 * p(-1, y - 2) + p(-1, y - 3) + 2) >> 2,
                    }
                }
                6 => {
                    let z = 2 * y - x;
                    match z {
                        0 | 2 | 4 | 6 => (p(-1, y - (x >> 1) - 1) + p(-1, y - (x >> 1)) + 1) >> 1,
                        1 | 3 | 5 => {
                            (p(-1, y - (x >> 1) - 2) + 2 * p(-1, y - (x >> 1) - 1) + p(-1, y - (x >> 1)) + 2) >> 2
                        }
                        -1 => (p(-1, 0) + 2 * p(-1, -1) + p(0, -1) + 2) >> 2,
                        _ => (p(x - 1, -1) + 2 * p(x - 2, -1) + p(x - 3, -1) + 2) >> 2,
                    }
                }
                7 => {
                    let i = x + (y >> 1);
                    if y & 1 == 0 {
                        (p(i, -1) + p(i + 1, -1) + 1) >> 1
                    } else {
                        (p(i, -1) + 2 * p(i + 1, -1) + p(i + 2, -1) + 2) >> 2
                    }
                }
                _ => {
                    let z = x + 2 * y;
                    let i = y + (x >> 1);
                    match z {
                        0 | 2 | 4 => (p(-1, i) + p(-1, i + 1) + 1) >> 1,
                        1 | 3 => (p(-1, i) + 2 * p(-1, i + 1) + p(-1, i + 2) + 2) >> 2,
                        5 => (p(-1, 2) + 3 * p(-1, 3) + 2) >> 2,
                        _ => p(-1, 3),
                    }
                }
            };
            put(plane, stride, x0 + x as usize, y0 + y as usize, v);
        }
    }
}

// ============================================================
// Intra_16x16
// ============================================================

/// Intra_16x16 亮度预测 (8.3.3)
pub(super) fn predict_16x16(plane: &mut [u8], stride: usize, x0: usize, y0: usize, mode: u8, nb: Neighbors) {
    match mode {
        0 if nb.top => {
            for dy in 0..16 {
                for dx in 0..16 {
                    let v = px(plane, stride, x0 + dx, y0 - 1);
                    put(plane, stride, x0 + dx, y0 + dy, v);
                }
            }
        }
        1 if nb.left => {
            for dy in 0..16 {
                let v = px(plane, stride, x0 - 1, y0 + dy);
                for dx in 0..16 {
                    put(plane, stride, x0 + dx, y0 + dy, v);
                }
            }
        }
        2 => {
            let top: i32 = if nb.top { (0..16).map(|i| px(plane, stride, x0 + i, y0 - 1)).sum() } else { 0 };
            let left: i32 = if nb.left { (0..16).map(|i| px(plane, stride, x0 - 1, y0 + i)).sum() } else { 0 };
            let dc = match (nb.left, nb.top) {
                (true, true) => (top + left + 16) >> 5,
                (true, false) => (left + 8) >> 4,
                (false, true) => (top + 8) >> 4,
                (false, false) => 128,
            };
            fill_block(plane, stride, x0, y0, 16, 16, dc as u8);
        }
        3 if nb.top && nb.left && nb.top_left => predict_plane(plane, stride, x0, y0, 16, 16),
        _ => fill_block(plane, stride, x0, y0, 16, 16, 128),
    }
}

/// 平面预测, 亮度 16x16 与色度 8x8 共用 (8-126 / 8-145)
fn predict_plane(plane: &mut [u8], stride: usize, x0: usize, y0: usize, w: usize, h: usize) {
    // p[x, -1] 与 p[-1, y], 下标 -1 对应左上角样本
    let top = |x: i32| px(plane, stride, (x0 as i32 + x) as usize, y0 - 1);
    let left = |y: i32| px(plane, stride, x0 - 1, (y0 as i32 + y) as usize);
    let xh = (w / 2) as i32;
    let yh = (h / 2) as i32;
    let mut gh = 0i32;
    for i in 0..xh {
        gh += (i + 1) * (top(xh + i) - top(xh - 2 - i));
    }
    let mut gv = 0i32;
    for i in 0..yh {
        gv += (i + 1) * (left(yh + i) - left(yh - 2 - i));
    }
    let a = 16 * (left(h as i32 - 1) + top(w as i32 - 1));
    let (b, c) = if w == 16 {
        ((5 * gh + 32) >> 6, (5 * gv + 32) >> 6)
    } else {
        ((34 * gh + 32) >> 6, (34 * gv + 32) >> 6)
    };
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let v = (a + b * (x - (xh - 1)) + c * (y - (yh - 1)) + 16) >> 5;
            put(plane, stride, x0 + x as usize, y0 + y as usize, v);
        }
    }
}

// ============================================================
// 色度 8x8
// ============================================================

/// 色度 8x8 预测 (8.3.4), 模式: 0=DC, 1=水平, 2=垂直, 3=平面
pub(super) fn predict_chroma_8x8(plane: &mut [u8], stride: usize, x0: usize, y0: usize, mode: u8, nb: Neighbors) {
    match mode {
        0 => {
            for (bx, by) in [(0usize, 0usize), (4, 0), (0, 4), (4, 4)] {
                let dc = chroma_dc(plane, stride, x0, y0, bx, by, nb);
                fill_block(plane, stride, x0 + bx, y0 + by, 4, 4, dc as u8);
            }
        }
        1 if nb.left => {
            for dy in 0..8 {
                let v = px(plane, stride, x0 - 1, y0 + dy);
                for dx in 0..8 {
                    put(plane, stride, x0 + dx, y0 + dy, v);
                }
            }
        }
        2 if nb.top => {
            for dy in 0..8 {
                for dx in 0..8 {
                    let v = px(plane, stride, x0 + dx, y0 - 1);
                    put(plane, stride, x0 + dx, y0 + dy, v);
                }
            }
        }
        3 if nb.top && nb.left && nb.top_left => predict_plane(plane, stride, x0, y0, 8, 8),
        _ => fill_block(plane, stride, x0, y0, 8, 8, 128),
    }
}

/// 色度 DC 的单个 4x4 块, 左上/右下块优先双边, 右上块优先上方, 左下块优先左侧
fn chroma_dc(plane: &[u8], stride: usize, x0: usize, y0: usize, bx: usize, by: usize, nb: Neighbors) -> i32 {
    let top = || (0..4).map(|i| px(plane, stride, x0 + bx + i, y0 - 1)).sum::<i32>();
    let left = || (0..4).map(|i| px(plane, stride, x0 - 1, y0 + by + i)).sum::<i32>();
    match (bx, by) {
        (4, 0) => {
            if nb.top {
                (top() + 2) >> 2
            } else if nb.left {
                (left() + 2) >> 2
            } else {
                128
            }
        }
        (0, 4) => {
            if nb.left {
                (left() + 2) >> 2
            } else if nb.top {
                (top() + 2) >> 2
            } else {
                128
            }
        }
        _ => match (nb.left, nb.top) {
            (true, true) => (top() + left() + 4) >> 3,
            (true, false) => (left() + 2) >> 2,
            (false, true) => (top() + 2) >> 2,
            (false, false) => 128,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: Neighbors = Neighbors {
        left: true,
        top: true,
        top_left: true,
        top_right: true,
    };

    fn read_block_4x4(plane: &[u8], stride: usize, x0: usize, y0: usize) -> [[u8; 4]; 4] {
        let mut block = [[0u8; 4]; 4];
        for dy in 0..4 {
            for dx in 0..4 {
                block[dy][dx] = plane[(y0 + dy) * stride + x0 + dx];
            }
        }
        block
    }

    fn plane_with_edges(top: &[u8], left: &[u8], top_left: u8) -> Vec<u8> {
        let stride = 16;
        let mut plane = vec![0u8; stride * stride];
        for (i, &v) in top.iter().enumerate() {
            plane[3 * stride + 4 + i] = v;
        }
        for (i, &v) in left.iter().enumerate() {
            plane[(4 + i) * stride + 3] = v;
        }
        plane[3 * stride + 3] = top_left;
        plane
    }

    #[test]
    fn test_intra4x4_diagonal_down_left_uses_top_right() {
        let mut plane = plane_with_edges(&[10, 20, 30, 40, 50, 60, 70, 80], &[200, 201, 202, 203], 0);
        predict_4x4(&mut plane, 16, 4, 4, 3, ALL);
        let got = read_block_4x4(&plane, 16, 4, 4);
        let expect = [[20, 30, 40, 50], [30, 40, 50, 60], [40, 50, 60, 70], [50, 60, 70, 78]];
        assert_eq!(got, expect, "模式3应按上方与右上样本做对角线预测");
    }

    #[test]
    fn test_intra4x4_top_right_substitution() {
        let mut plane = plane_with_edges(&[10, 20, 30, 40, 99, 99, 99, 99], &[0; 4], 0);
        let nb = Neighbors {
            top_right: false,
            ..ALL
        };
        predict_4x4(&mut plane, 16, 4, 4, 7, nb);
        let got = read_block_4x4(&plane, 16, 4, 4);
        // 右上不可用时 p[4..7,-1] 取 p[3,-1] = 40
        assert_eq!(got[0], [15, 25, 35, 40]);
        assert_eq!(got[3][3], 40);
    }

    #[test]
    fn test_intra4x4_diagonal_down_right_mapping() {
        let mut plane = plane_with_edges(&[10, 20, 30, 40], &[50, 60, 70, 80], 5);
        predict_4x4(&mut plane, 16, 4, 4, 4, ALL);
        let got = read_block_4x4(&plane, 16, 4, 4);
        // 对角线: (p[0,-1] + 2*p[-1,-1] + p[-1,0] + 2) >> 2 = (10 + 10 + 50 + 2) >> 2 = 18
        assert_eq!(got[0][0], 18);
        assert_eq!(got[3][3], 18);
        // (x=1, y=0): (p[-1,-1] + 2*p[0,-1] + p[1,-1] + 2) >> 2 = (5 + 20 + 20 + 2) >> 2 = 11
        assert_eq!(got[0][1], 11);
        // (x=0, y=1): (p[-1,-1] + 2*p[-1,0] + p[-1,1] + 2) >> 2 = (5 + 100 + 60 + 2) >> 2 = 41
        assert_eq!(got[1][0], 41);
    }

    #[test]
    fn test_intra4x4_horizontal_up_tail() {
        let mut plane = plane_with_edges(&[0; 4], &[10, 20, 30, 40], 0);
        let nb = Neighbors {
            left: true,
            ..Neighbors::default()
        };
        predict_4x4(&mut plane, 16, 4, 4, 8, nb);
        let got = read_block_4x4(&plane, 16, 4, 4);
        assert_eq!(got[0][0], 15);
        assert_eq!(got[2][1], (30 + 3 * 40 + 2) >> 2);
        assert_eq!(got[3], [40, 40, 40, 40]);
    }

    #[test]
    fn test_intra4x4_dc_variants() {
        let mut plane = plane_with_edges(&[10, 10, 10, 10], &[30, 30, 30, 30], 0);
        predict_4x4(&mut plane, 16, 4, 4, 2, ALL);
        assert_eq!(read_block_4x4(&plane, 16, 4, 4)[0][0], 20);
        let top_only = Neighbors {
            top: true,
            ..Neighbors::default()
        };
        predict_4x4(&mut plane, 16, 4, 4, 2, top_only);
        assert_eq!(read_block_4x4(&plane, 16, 4, 4)[1][1], 10);
        predict_4x4(&mut plane, 16, 4, 4, 2, Neighbors::default());
        assert_eq!(read_block_4x4(&plane, 16, 4, 4)[2][2], 128);
    }

    #[test]
    fn test_intra4x4_missing_neighbor_falls_back_to_128() {
        let mut plane = vec![7u8; 256];
        predict_4x4(&mut plane, 16, 4, 0, 0, Neighbors::default());
        assert_eq!(read_block_4x4(&plane, 16, 4, 0), [[128u8; 4]; 4], "无上方参考时垂直模式回退");
    }

    #[test]
    fn test_block_neighbor_derivation() {
        let mb = Neighbors {
            left: false,
            top: true,
            top_left: false,
            top_right: true,
        };
        let nb = Neighbors::for_block4x4(mb, 3, 0);
        assert!(nb.top_right, "首行最右块取右上宏块");
        let nb = Neighbors::for_block4x4(mb, 1, 1);
        assert!(!nb.top_right, "块 3 的右上 (块 4) 尚未解码");
        let nb = Neighbors::for_block4x4(mb, 0, 1);
        assert!(nb.top_right, "块 2 的右上 (块 1) 已解码");
        assert!(!nb.left && !nb.top_left);
        let nb = Neighbors::for_block4x4(mb, 3, 2);
        assert!(!nb.top_right, "宏块右侧列不可用");
    }

    #[test]
    fn test_intra16x16_plane_on_flat_edges() {
        let stride = 32;
        let mut plane = vec![90u8; stride * 32];
        predict_16x16(&mut plane, stride, 8, 8, 3, ALL);
        assert!((8..24).all(|y| (8..24).all(|x| plane[y * stride + x] == 90)), "平坦边界的平面预测应保持常数");
    }

    #[test]
    fn test_intra16x16_dc_left_only() {
        let stride = 32;
        let mut plane = vec![0u8; stride * 32];
        for y in 8..24 {
            plane[y * stride + 7] = 64;
        }
        let nb = Neighbors {
            left: true,
            ..Neighbors::default()
        };
        predict_16x16(&mut plane, stride, 8, 8, 2, nb);
        assert_eq!(plane[8 * stride + 8], 64);
        assert_eq!(plane[23 * stride + 23], 64);
    }

    #[test]
    fn test_chroma_dc_per_block_rules() {
        let stride = 16;
        let mut plane = vec![0u8; stride * 16];
        for x in 4..12 {
            plane[3 * stride + x] = if x < 8 { 40 } else { 80 };
        }
        for y in 4..12 {
            plane[y * stride + 3] = if y < 8 { 120 } else { 160 };
        }
        predict_chroma_8x8(&mut plane, stride, 4, 4, 0, ALL);
        // 左上: (160 + 480 + 4) >> 3 = 80
        assert_eq!(plane[4 * stride + 4], 80);
        // 右上: 仅上方 = 80
        assert_eq!(plane[4 * stride + 8], 80);
        // 左下: 仅左侧 = 160
        assert_eq!(plane[8 * stride + 4], 160);
        // 右下: (320 + 640 + 4) >> 3 = 120
        assert_eq!(plane[8 * stride + 8], 120);
    }

    #[test]
    fn test_chroma_horizontal_uses_left_column() {
        let stride = 16;
        let mut plane = vec![0u8; stride * 16];
        for y in 4..12 {
            plane[y * stride + 3] = y as u8 * 10;
        }
        let nb = Neighbors {
            left: true,
            ..Neighbors::default()
        };
        predict_chroma_8x8(&mut plane, stride, 4, 4, 1, nb);
        for y in 4..12 {
            assert!((4..12).all(|x| plane[y * stride + x] == y as u8 * 10));
        }
    }
}
