//! Slice 状态机与 slice 数据解码.
//!
//! `decode_slice` 负责一个 slice 的宏块循环: 语法解析 → 运动推导 →
//! 重建 → 写回网格. 循环内的任何错误都终止该 slice, 已完成的宏块保留,
//! 其余宏块留给图像级的错误隐藏.

use log::{debug, trace};
use tao_core::{TaoError, TaoResult};

use super::dispatch::MbStrategy;
use super::macroblock::{MbParams, MbRecord, MbSyntaxReader, MbType, decode_macroblock};
use super::macroblock_state::{MbGrid, MbPos};
use super::mv_pred::derive_motion;
use super::parameter_sets::Pps;
use super::picture::Picture;
use super::recon::{InterRefs, ReconParams, reconstruct_mb};
use super::residual::Dequantizer;
use super::slice_parse::SliceHeader;

// ============================================================
// 状态机
// ============================================================

/// 访问单元内的 slice 解码状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(super) enum SliceState {
    /// 等待图像的第一个 slice
    #[default]
    AwaitingFirstSlice,
    /// 正在解码 slice 数据
    InSlice,
    /// 当前 slice 已结束, 图像可能还有后续 slice
    SliceComplete,
    /// 输入耗尽但访问单元尚未确认结束
    AwaitingMoreData,
}

impl SliceState {
    /// 是否有未完成的图像
    pub(super) fn has_open_picture(self) -> bool {
        matches!(self, Self::InSlice | Self::SliceComplete | Self::AwaitingMoreData)
    }
}

// ============================================================
// slice 解码
// ============================================================

/// 一个 slice 的解码输入
pub(super) struct SliceJob<'a> {
    pub header: &'a SliceHeader,
    pub pps: &'a Pps,
    pub cabac: bool,
    pub slice_id: i32,
    pub dequant: &'a Dequantizer,
    /// P slice 的参考图像, I slice 为 `None`
    pub refs: Option<InterRefs<'a>>,
    /// 每个 ref_idx 对应的图像标识, 写入 `MbInfo::ref_pic` 供去块使用
    pub ref_ids: Vec<i64>,
    /// 每个 ref_idx 对应的图像是否含隐藏宏块
    pub ref_concealed: Vec<bool>,
}

/// 一个 slice 的解码结果
#[derive(Debug, Default)]
pub(super) struct SliceOutcome {
    pub decoded_mbs: u32,
    /// 参考了含隐藏宏块图像的帧间宏块数
    pub propagated_mbs: u32,
    pub qp_sum: i64,
    pub error: Option<TaoError>,
}

/// 解码一个 slice 的宏块数据
pub(super) fn decode_slice(rbsp: &[u8], job: &SliceJob, pic: &mut Picture, grid: &mut MbGrid) -> SliceOutcome {
    let mut outcome = SliceOutcome::default();
    let result = MbStrategy::select(job.cabac, job.header.slice_type).and_then(|strategy| {
        trace!(
            "H264: slice 开始, strategy={:?}, first_mb={}, qp={}",
            strategy, job.header.first_mb, job.header.slice_qp
        );
        strategy.run(rbsp, job.header, &mut |reader: &mut dyn MbSyntaxReader| {
            decode_mbs(reader, strategy, job, pic, grid, &mut outcome)
        })?
    });
    if let Err(err) = result {
        debug!(
            "H264: slice 解码中止, first_mb={}, decoded={}, err={}",
            job.header.first_mb, outcome.decoded_mbs, err
        );
        outcome.error = Some(err);
    }
    outcome
}

fn decode_mbs(
    reader: &mut dyn MbSyntaxReader,
    strategy: MbStrategy,
    job: &SliceJob,
    pic: &mut Picture,
    grid: &mut MbGrid,
    outcome: &mut SliceOutcome,
) -> TaoResult<()> {
    let mb_count = grid.mb_count();
    let mut addr = job.header.first_mb as usize;
    if addr >= mb_count {
        return Err(TaoError::InvalidData(format!(
            "H264: first_mb_in_slice 超出图像, first_mb={}, mb_count={}",
            addr, mb_count
        )));
    }
    let params = MbParams {
        p_slice: strategy.is_p(),
        num_ref_idx_active: job.header.num_ref_idx_l0_active,
        constrained_intra_pred: job.pps.constrained_intra_pred,
    };
    let recon = ReconParams {
        dequant: job.dequant,
        chroma_qp_offset: [job.pps.chroma_qp_index_offset, job.pps.second_chroma_qp_index_offset],
        constrained_intra_pred: job.pps.constrained_intra_pred,
    };

    let mut qp = job.header.slice_qp;
    let mut rec = MbRecord::default();
    loop {
        if grid.infos[addr].is_decoded() {
            return Err(TaoError::InvalidData(format!("H264: 宏块被重复解码, mb={}", addr)));
        }
        rec.reset(job.slice_id, qp);
        let end = {
            let pos = MbPos::new(grid, addr, job.slice_id);
            let end = decode_macroblock(reader, &pos, &params, &mut rec)?;
            if reader.overrun() {
                return Err(TaoError::InvalidData(format!("H264: slice 数据越界, mb={}", addr)));
            }
            if !rec.mb_type.is_intra() {
                derive_motion(&pos, &mut rec)?;
                if assign_ref_pics(job, &mut rec)? {
                    outcome.propagated_mbs += 1;
                }
            }
            reconstruct_mb(pic, &pos, &rec, &recon, job.refs.as_ref())?;
            end
        };

        // I_PCM 的去块 QP 为 0, 但后续宏块的 QP 预测沿用之前的值
        if rec.mb_type != MbType::IPcm {
            qp = rec.info.qp;
        }
        outcome.qp_sum += i64::from(qp);
        outcome.decoded_mbs += 1;
        if let Some(slot) = pic.mb_motion.get_mut(addr) {
            *slot = (!rec.mb_type.is_intra()).then_some(rec.info.mv[0]);
        }
        grid.infos[addr] = rec.info.clone();

        addr += 1;
        if end || addr >= mb_count {
            return Ok(());
        }
    }
}

/// 写入每个 8x8 分区引用的图像标识, 返回是否参考了含隐藏宏块的图像
fn assign_ref_pics(job: &SliceJob, rec: &mut MbRecord) -> TaoResult<bool> {
    let mut propagated = false;
    for b8 in 0..4 {
        let raster = (b8 / 2) * 8 + (b8 % 2) * 2;
        let ref_idx = rec.info.ref_idx[raster];
        if ref_idx < 0 {
            continue;
        }
        let idx = ref_idx as usize;
        let id = job.ref_ids.get(idx).copied().ok_or_else(|| {
            TaoError::InvalidData(format!(
                "H264: ref_idx 超出参考列表, ref_idx={}, list_len={}",
                ref_idx,
                job.ref_ids.len()
            ))
        })?;
        rec.info.ref_pic[b8] = id;
        propagated |= job.ref_concealed.get(idx).copied().unwrap_or(false);
    }
    Ok(propagated)
}
