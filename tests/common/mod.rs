//! 集成测试共用的码流构造.
//!
//! 只覆盖 Baseline 的最小语法: poc_type 2 的 SPS, 默认 PPS,
//! I_PCM 宏块组成的 I 帧与全跳过的 P 帧.

#![allow(dead_code)]

use tao_avc::core::bitwriter::{BitWriter, insert_emulation_prevention};

const LOG2_MAX_FRAME_NUM: u32 = 4;

/// 拼接 4 字节起始码、NAL 头与 EBSP
pub fn nal(ref_idc: u8, nal_type: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 1, (ref_idc << 5) | nal_type];
    out.extend_from_slice(&insert_emulation_prevention(rbsp));
    out
}

/// Baseline SPS, `sar` 写入 VUI Extended_SAR
pub fn sps(mb_width: u32, mb_height: u32, sar: Option<(u32, u32)>) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(66, 8);
    bw.write_bits(0, 8);
    bw.write_bits(30, 8);
    bw.write_ue(0);
    bw.write_ue(LOG2_MAX_FRAME_NUM - 4);
    bw.write_ue(2);
    bw.write_ue(2);
    bw.write_flag(false);
    bw.write_ue(mb_width - 1);
    bw.write_ue(mb_height - 1);
    bw.write_flag(true);
    bw.write_flag(true);
    bw.write_flag(false);
    match sar {
        Some((w, h)) => {
            bw.write_flag(true);
            bw.write_flag(true);
            bw.write_bits(255, 8);
            bw.write_bits(w, 16);
            bw.write_bits(h, 16);
            for _ in 0..8 {
                bw.write_flag(false);
            }
        }
        None => bw.write_flag(false),
    }
    bw.write_rbsp_trailing_bits();
    nal(3, 7, &bw.finish())
}

/// CAVLC, 单参考, 带去块控制的 PPS
pub fn pps() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_bits(0, 2);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_flag(true);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_rbsp_trailing_bits();
    nal(3, 8, &bw.finish())
}

fn slice_header(bw: &mut BitWriter, idr: Option<u32>, p_slice: bool, frame_num: u32) {
    bw.write_ue(0);
    bw.write_ue(if p_slice { 5 } else { 7 });
    bw.write_ue(0);
    bw.write_bits(frame_num, LOG2_MAX_FRAME_NUM);
    if let Some(idr_pic_id) = idr {
        bw.write_ue(idr_pic_id);
    }
    if p_slice {
        bw.write_flag(false);
        bw.write_flag(false);
    }
    if idr.is_some() {
        bw.write_flag(false);
        bw.write_flag(false);
    } else {
        bw.write_flag(false);
    }
    bw.write_se(0);
    bw.write_ue(0);
    bw.write_se(0);
    bw.write_se(0);
}

/// I_PCM 组成的 I 帧, `luma(mb_index)` 给出每个宏块的亮度值, 色度为 128
pub fn pcm_picture(idr: Option<u32>, frame_num: u32, mb_count: u32, luma: impl Fn(u32) -> u8) -> Vec<u8> {
    let mut bw = BitWriter::new();
    slice_header(&mut bw, idr, false, frame_num);
    for mb in 0..mb_count {
        bw.write_ue(25);
        bw.align_zero();
        bw.write_bytes(&[luma(mb); 256]);
        bw.write_bytes(&[128; 128]);
    }
    bw.write_rbsp_trailing_bits();
    nal(3, if idr.is_some() { 5 } else { 1 }, &bw.finish())
}

/// 全部宏块跳过的 P 帧
pub fn skip_picture(frame_num: u32, mb_count: u32) -> Vec<u8> {
    let mut bw = BitWriter::new();
    slice_header(&mut bw, None, true, frame_num);
    bw.write_ue(mb_count);
    bw.write_rbsp_trailing_bits();
    nal(2, 1, &bw.finish())
}

/// 一个 IDR 加 `p_frames` 个跳过帧, 按访问单元切开
pub fn gop(mb_width: u32, mb_height: u32, p_frames: u32) -> Vec<Vec<u8>> {
    let mb_count = mb_width * mb_height;
    let mut first = sps(mb_width, mb_height, None);
    first.extend(pps());
    first.extend(pcm_picture(Some(0), 0, mb_count, |mb| (mb * 16 % 256) as u8));
    let mut units = vec![first];
    for i in 1..=p_frames {
        units.push(skip_picture(i % (1 << LOG2_MAX_FRAME_NUM), mb_count));
    }
    units
}
