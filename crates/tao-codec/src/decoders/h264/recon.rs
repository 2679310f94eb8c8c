//! 宏块重建: 预测 + 反量化 + 反变换 + 残差叠加.

use tao_core::{TaoError, TaoResult};

use super::common::{BLK4X4_XY, chroma_qp_from_luma_with_offset};
use super::inter::{PartWeights, predict_partition};
use super::intra::{Neighbors, predict_4x4, predict_16x16, predict_chroma_8x8};
use super::macroblock::{MbRecord, MbType};
use super::macroblock_state::{MbInfo, MbPos};
use super::picture::Picture;
use super::residual::{Dequantizer, add_residual_4x4, inverse_hadamard_2x2, inverse_hadamard_4x4, scaling_list_index};

/// slice 级重建参数
pub(super) struct ReconParams<'a> {
    pub dequant: &'a Dequantizer,
    /// Cb / Cr 的 chroma_qp_index_offset
    pub chroma_qp_offset: [i32; 2],
    pub constrained_intra_pred: bool,
}

/// 当前 slice 的参考图像与加权参数, 以 ref_idx 寻址
pub(super) struct InterRefs<'a> {
    pub pictures: Vec<Option<&'a Picture>>,
    pub weights: Option<Vec<PartWeights>>,
}

impl<'a> InterRefs<'a> {
    pub(super) fn picture(&self, ref_idx: usize) -> TaoResult<&'a Picture> {
        self.pictures.get(ref_idx).copied().flatten().ok_or_else(|| {
            TaoError::InvalidData(format!(
                "H264: 参考图像缺失, ref_idx={}, list_len={}",
                ref_idx,
                self.pictures.len()
            ))
        })
    }
}

/// 帧内预测使用的宏块级邻居 (受 constrained_intra_pred 约束)
pub(super) fn intra_neighbors(pos: &MbPos, constrained_intra_pred: bool) -> Neighbors {
    let usable = |nb: Option<&MbInfo>| nb.is_some_and(|info| !constrained_intra_pred || info.kind.is_intra());
    Neighbors {
        left: usable(pos.mb(-1, 0)),
        top: usable(pos.mb(0, -1)),
        top_left: usable(pos.mb(-1, -1)),
        top_right: usable(pos.mb(1, -1)),
    }
}

/// 重建一个已解析的宏块
pub(super) fn reconstruct_mb(
    pic: &mut Picture,
    pos: &MbPos,
    rec: &MbRecord,
    params: &ReconParams,
    refs: Option<&InterRefs>,
) -> TaoResult<()> {
    let x0 = pos.mb_x() * 16;
    let y0 = pos.mb_y() * 16;
    let qp = rec.info.qp;

    match rec.mb_type {
        MbType::IPcm => {
            write_pcm(pic, x0, y0, &rec.pcm);
            return Ok(());
        }
        MbType::I4x4 => {
            let mb_nb = intra_neighbors(pos, params.constrained_intra_pred);
            let stride = pic.strides[0];
            for &(x4, y4) in BLK4X4_XY.iter() {
                let raster = y4 * 4 + x4;
                let (bx, by) = (x0 + x4 * 4, y0 + y4 * 4);
                let nb = Neighbors::for_block4x4(mb_nb, x4, y4);
                predict_4x4(&mut pic.planes[0], stride, bx, by, rec.info.intra4x4_modes[raster], nb);
                let mut coeffs = rec.luma[raster];
                params.dequant.ac(&mut coeffs, qp, scaling_list_index(true, 0), false);
                add_residual_4x4(&mut pic.planes[0], stride, bx, by, &coeffs);
            }
        }
        MbType::I16x16 { pred_mode, .. } => {
            let mb_nb = intra_neighbors(pos, params.constrained_intra_pred);
            let stride = pic.strides[0];
            predict_16x16(&mut pic.planes[0], stride, x0, y0, pred_mode, mb_nb);
            let list = scaling_list_index(true, 0);
            let mut dc = rec.luma_dc;
            inverse_hadamard_4x4(&mut dc);
            params.dequant.luma_dc(&mut dc, qp, list);
            for raster in 0..16 {
                let mut coeffs = rec.luma[raster];
                coeffs[0] = dc[raster];
                params.dequant.ac(&mut coeffs, qp, list, true);
                add_residual_4x4(&mut pic.planes[0], stride, x0 + (raster % 4) * 4, y0 + (raster / 4) * 4, &coeffs);
            }
        }
        _ => {
            let refs = refs.ok_or_else(|| TaoError::InvalidData("H264: 帧间宏块缺少参考列表".into()))?;
            for part in rec.parts.iter() {
                let raster = part.y4 * 4 + part.x4;
                let reference = refs.picture(usize::from(part.ref_idx))?;
                let weights = refs.weights.as_ref().and_then(|w| w.get(usize::from(part.ref_idx)));
                predict_partition(
                    pic,
                    reference,
                    x0 + part.x4 * 4,
                    y0 + part.y4 * 4,
                    part.w4 * 4,
                    part.h4 * 4,
                    rec.info.mv[raster],
                    weights,
                );
            }
            if rec.info.cbp_luma() != 0 {
                let stride = pic.strides[0];
                let list = scaling_list_index(false, 0);
                for raster in 0..16 {
                    let mut coeffs = rec.luma[raster];
                    params.dequant.ac(&mut coeffs, qp, list, false);
                    add_residual_4x4(&mut pic.planes[0], stride, x0 + (raster % 4) * 4, y0 + (raster / 4) * 4, &coeffs);
                }
            }
        }
    }

    let intra = rec.mb_type.is_intra();
    if intra {
        let mb_nb = intra_neighbors(pos, params.constrained_intra_pred);
        for c in 1..3 {
            let stride = pic.strides[c];
            predict_chroma_8x8(&mut pic.planes[c], stride, x0 / 2, y0 / 2, rec.info.chroma_pred_mode, mb_nb);
        }
    }
    if rec.info.cbp_chroma() != 0 {
        reconstruct_chroma_residual(pic, x0 / 2, y0 / 2, rec, params, intra);
    }
    Ok(())
}

fn reconstruct_chroma_residual(pic: &mut Picture, cx0: usize, cy0: usize, rec: &MbRecord, params: &ReconParams, intra: bool) {
    for comp in 0..2 {
        let qpc = chroma_qp_from_luma_with_offset(rec.info.qp, params.chroma_qp_offset[comp]);
        let list = scaling_list_index(intra, comp + 1);
        let mut dc = rec.chroma_dc[comp];
        inverse_hadamard_2x2(&mut dc);
        params.dequant.chroma_dc(&mut dc, qpc, list);
        let stride = pic.strides[comp + 1];
        for (blk, &dc_value) in dc.iter().enumerate() {
            let mut coeffs = rec.chroma_ac[comp][blk];
            coeffs[0] = dc_value;
            params.dequant.ac(&mut coeffs, qpc, list, true);
            add_residual_4x4(
                &mut pic.planes[comp + 1],
                stride,
                cx0 + (blk & 1) * 4,
                cy0 + (blk >> 1) * 4,
                &coeffs,
            );
        }
    }
}

/// I_PCM: 256 个亮度样本后接 64 个 Cb 与 64 个 Cr 样本, 均为光栅顺序
fn write_pcm(pic: &mut Picture, x0: usize, y0: usize, pcm: &[u8]) {
    let layout = [(0usize, 16usize, x0, y0, 0usize), (1, 8, x0 / 2, y0 / 2, 256), (2, 8, x0 / 2, y0 / 2, 320)];
    for (c, size, bx, by, start) in layout {
        let stride = pic.strides[c];
        for row in 0..size {
            let src_off = start + row * size;
            let dst_off = (by + row) * stride + bx;
            let (Some(src), Some(dst)) = (pcm.get(src_off..src_off + size), pic.planes[c].get_mut(dst_off..dst_off + size))
            else {
                return;
            };
            dst.copy_from_slice(src);
        }
    }
}
