//! 帧间预测样本生成 (8.4.2).
//!
//! 亮度为 6 抽头 1/4 像素插值, 色度为 1/8 像素双线性插值,
//! 参考样本越界时按图像边缘钳位. 显式加权预测在插值之后逐样本应用.

use super::common::{apply_weighted_sample, clip_u8};
use super::picture::Picture;

/// 单个分区的加权参数 (权重, 偏移, log2 分母), 按 Y/Cb/Cr 排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PartWeights {
    pub weight: [i32; 3],
    pub offset: [i32; 3],
    pub log2_denom: [u32; 3],
}

/// 带边缘钳位的参考平面视图
struct RefPlane<'a> {
    data: &'a [u8],
    stride: usize,
    width: i32,
    height: i32,
}

impl RefPlane<'_> {
    fn at(&self, x: i32, y: i32) -> i32 {
        let sx = x.clamp(0, self.width - 1) as usize;
        let sy = y.clamp(0, self.height - 1) as usize;
        i32::from(self.data.get(sy * self.stride + sx).copied().unwrap_or(0))
    }
}

fn tap6(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32) -> i32 {
    a - 5 * b + 20 * c + 20 * d - 5 * e + f
}

/// 亮度 1/4 像素插值 (8.4.2.2.1), (x, y) 为整像素位置, (fx, fy) 为 1/4 分数
fn luma_sample(r: &RefPlane, x: i32, y: i32, fx: i32, fy: i32) -> i32 {
    let g = |dx: i32, dy: i32| r.at(x + dx, y + dy);
    // 水平半像素 b (位于 (dx, dy) 与其右侧之间) 的中间值
    let b1 = |dx: i32, dy: i32| {
        tap6(g(dx - 2, dy), g(dx - 1, dy), g(dx, dy), g(dx + 1, dy), g(dx + 2, dy), g(dx + 3, dy))
    };
    // 垂直半像素 h (位于 (dx, dy) 与其下方之间) 的中间值
    let h1 = |dx: i32, dy: i32| {
        tap6(g(dx, dy - 2), g(dx, dy - 1), g(dx, dy), g(dx, dy + 1), g(dx, dy + 2), g(dx, dy + 3))
    };
    let half_h = |dx: i32, dy: i32| i32::from(clip_u8((b1(dx, dy) + 16) >> 5));
    let half_v = |dx: i32, dy: i32| i32::from(clip_u8((h1(dx, dy) + 16) >> 5));
    let center = || {
        let j1 = tap6(b1(0, -2), b1(0, -1), b1(0, 0), b1(0, 1), b1(0, 2), b1(0, 3));
        i32::from(clip_u8((j1 + 512) >> 10))
    };
    let avg = |p: i32, q: i32| (p + q + 1) >> 1;

    match (fx, fy) {
        (0, 0) => g(0, 0),
        (1, 0) => avg(g(0, 0), half_h(0, 0)),
        (2, 0) => half_h(0, 0),
        (3, 0) => avg(half_h(0, 0), g(1, 0)),
        (0, 1) => avg(g(0, 0), half_v(0, 0)),
        (0, 2) => half_v(0, 0),
        (0, 3) => avg(half_v(0, 0), g(0, 1)),
        (2, 1) => avg(half_h(0, 0), center()),
        (2, 3) => avg(center(), half_h(0, 1)),
        (1, 2) => avg(half_v(0, 0), center()),
        (3, 2) => avg(center(), half_v(1, 0)),
        (2, 2) => center(),
        (1, 1) => avg(half_h(0, 0), half_v(0, 0)),
        (3, 1) => avg(half_h(0, 0), half_v(1, 0)),
        (1, 3) => avg(half_v(0, 0), half_h(0, 1)),
        _ => avg(half_v(1, 0), half_h(0, 1)),
    }
}

/// 生成一个分区的预测样本并写入 `dst` 图像的对应位置
///
/// `(px, py)` 为分区左上角的亮度坐标, `(w, h)` 为亮度尺寸, `mv` 单位为 1/4 像素.
#[allow(clippy::too_many_arguments)]
pub(super) fn predict_partition(
    dst: &mut Picture,
    reference: &Picture,
    px: usize,
    py: usize,
    w: usize,
    h: usize,
    mv: [i16; 2],
    weights: Option<&PartWeights>,
) {
    let mvx = i32::from(mv[0]);
    let mvy = i32::from(mv[1]);

    let (rw, rh) = reference.plane_size(0);
    let luma = RefPlane {
        data: &reference.planes[0],
        stride: reference.strides[0],
        width: rw as i32,
        height: rh as i32,
    };
    let stride = dst.strides[0];
    let base_x = px as i32 + (mvx >> 2);
    let base_y = py as i32 + (mvy >> 2);
    for y in 0..h {
        for x in 0..w {
            let v = luma_sample(&luma, base_x + x as i32, base_y + y as i32, mvx & 3, mvy & 3);
            let sample = weigh(clip_u8(v), weights, 0);
            if let Some(p) = dst.planes[0].get_mut((py + y) * stride + px + x) {
                *p = sample;
            }
        }
    }

    // 4:2:0 色度: mvC 与亮度 mv 数值相同, 单位为 1/8 色度像素
    let (cw, ch) = reference.plane_size(1);
    let cx0 = px / 2;
    let cy0 = py / 2;
    let fx = mvx & 7;
    let fy = mvy & 7;
    for c in 1..3 {
        let plane = RefPlane {
            data: &reference.planes[c],
            stride: reference.strides[c],
            width: cw as i32,
            height: ch as i32,
        };
        let stride = dst.strides[c];
        let base_x = cx0 as i32 + (mvx >> 3);
        let base_y = cy0 as i32 + (mvy >> 3);
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                let sx = base_x + x as i32;
                let sy = base_y + y as i32;
                let v = ((8 - fx) * (8 - fy) * plane.at(sx, sy)
                    + fx * (8 - fy) * plane.at(sx + 1, sy)
                    + (8 - fx) * fy * plane.at(sx, sy + 1)
                    + fx * fy * plane.at(sx + 1, sy + 1)
                    + 32)
                    >> 6;
                let sample = weigh(v as u8, weights, c);
                if let Some(p) = dst.planes[c].get_mut((cy0 + y) * stride + cx0 + x) {
                    *p = sample;
                }
            }
        }
    }
}

fn weigh(sample: u8, weights: Option<&PartWeights>, c: usize) -> u8 {
    match weights {
        Some(w) => apply_weighted_sample(sample, w.weight[c], w.offset[c], w.log2_denom[c]),
        None => sample,
    }
}
