use tao_core::TaoError;

use crate::decoder::Decoder;
use crate::frame::{Frame, PictureType};
use crate::packet::Packet;

use super::super::{BufferInfo, DecodingState, EcActiveIdc, H264Decoder};
use super::helpers::*;

fn gradient_pcm() -> Vec<u8> {
    let mut samples: Vec<u8> = (0..=255u8).collect();
    samples.extend(std::iter::repeat_n(100u8, 64));
    samples.extend(std::iter::repeat_n(150u8, 64));
    samples
}

/// 每行都是 0, 10, 20, ... 150 的水平渐变
fn ramp_pcm() -> Vec<u8> {
    let mut samples: Vec<u8> = (0..256).map(|i| ((i % 16) * 10) as u8).collect();
    samples.extend(std::iter::repeat_n(128u8, 128));
    samples
}

#[test]
fn test_decode_pcm_idr_exact() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    w.pcm_samples(&gradient_pcm()).pcm(200, 60);
    let stream = concat(&[&sps.nal(), &pps.nal(), &w.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let mut info = BufferInfo::default();
    let state = dec.decode_frame_no_delay(&stream, &mut info);
    assert_eq!(state, DecodingState::ERROR_FREE, "干净码流不应报错");
    assert_eq!(info.buffer_status, 1);
    let pic = info.picture.expect("应输出一幅图像");
    assert_eq!((pic.width, pic.height), (32, 16));
    assert_eq!(pic.strides, [32, 16, 16]);
    for y in 0..16 {
        for x in 0..16 {
            assert_eq!(luma_at(&pic, x, y) as usize, y * 16 + x, "PCM 样本应原样输出");
            assert_eq!(luma_at(&pic, x + 16, y), 200);
        }
    }
    assert_eq!(pic.planes[1][0], 100);
    assert_eq!(pic.planes[2][0], 150);
    assert_eq!(pic.planes[1][8], 60, "第二个宏块的色度");
}

#[test]
fn test_decode_intra16x16_dc_residual() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    for (dc, expected) in [(0, 128u8), (1, 129), (-1, 127)] {
        let cfg = SliceConfig {
            qp: 28,
            ..SliceConfig::idr(0)
        };
        let mut w = SliceWriter::new(&sps, &pps, &cfg);
        w.i16x16_dc(dc);
        let stream = concat(&[&sps.nal(), &pps.nal(), &w.finish()]);

        let mut dec = open_decoder(EcActiveIdc::default());
        let mut info = BufferInfo::default();
        let state = dec.decode_frame_no_delay(&stream, &mut info);
        assert!(state.is_error_free(), "dc={} 解码不应出错, state={:?}", dc, state);
        let pic = info.picture.expect("应输出图像");
        assert_luma_uniform(&pic, expected);
        assert!(pic.planes[1].iter().all(|&v| v == 128), "无邻居时色度 DC 预测为 128");
    }
}

#[test]
fn test_decode_dc_prediction_from_left_neighbor() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let cfg = SliceConfig {
        qp: 28,
        disable_deblocking: true,
        ..SliceConfig::idr(0)
    };
    let mut w = SliceWriter::new(&sps, &pps, &cfg);
    w.i16x16_dc(1).i16x16_dc(1);
    let stream = concat(&[&sps.nal(), &pps.nal(), &w.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let mut info = BufferInfo::default();
    dec.decode_frame_no_delay(&stream, &mut info);
    let pic = info.picture.expect("应输出图像");
    assert_eq!(luma_at(&pic, 0, 0), 129);
    assert_eq!(luma_at(&pic, 15, 15), 129);
    assert_eq!(luma_at(&pic, 16, 0), 130, "右侧宏块以左邻居均值为 DC 预测");
    assert_eq!(luma_at(&pic, 31, 15), 130);
}

#[test]
fn test_output_waits_for_access_unit_boundary() {
    let sps = SpsConfig::default();
    let stream = pcm_idr_stream(&sps, 77, 128);
    let mut dec = open_decoder(EcActiveIdc::default());

    let (state, pic, _) = feed(&mut dec, &stream, 1);
    assert!(state.is_error_free());
    assert!(pic.is_none(), "访问单元未结束前不输出");
    assert!(dec.has_pending_picture());

    let (state, pic, ts) = feed(&mut dec, &aud(), 2);
    assert!(state.is_error_free());
    let pic = pic.expect("AUD 结束访问单元后应输出");
    assert_luma_uniform(&pic, 77);
    assert_eq!(ts, 1, "输出时间戳沿用图像所在调用的时间戳");
    assert!(!dec.has_pending_picture());
}

#[test]
fn test_p_skip_copies_reference() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    w.pcm_samples(&gradient_pcm());
    let idr = concat(&[&sps.nal(), &pps.nal(), &w.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let (_, pic, _) = feed(&mut dec, &idr, 10);
    assert!(pic.is_none());
    let (state, first, ts) = feed(&mut dec, &skip_p(&sps, &pps, 1), 20);
    assert!(state.is_error_free());
    let first = first.expect("下一个访问单元开始时输出 IDR");
    assert_eq!(ts, 10);

    let (state, second, ts) = feed(&mut dec, &[], 0);
    assert!(state.is_error_free());
    let second = second.expect("冲刷后输出 P 帧");
    assert_eq!(ts, 20);
    assert_eq!(first, second, "全跳过的 P 帧应与参考帧一致");
}

#[test]
fn test_p16x16_motion_vector_shifts_reference() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    w.pcm_samples(&ramp_pcm());
    let idr = w.finish();
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::p(1));
    // 向右 1 个整像素
    w.p16x16((4, 0));
    let p = w.finish();
    let stream = concat(&[&sps.nal(), &pps.nal(), &idr, &p]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let (state, pics) = decode_all(&mut dec, &stream);
    assert!(state.is_error_free(), "state={:?}", state);
    assert_eq!(pics.len(), 2);
    let shifted = &pics[1];
    for y in 0..16 {
        for x in 0..16 {
            let src = (x + 1).min(15);
            assert_eq!(luma_at(shifted, x, y) as usize, src * 10, "x={}, y={}", x, y);
        }
    }
}

#[test]
fn test_weighted_prediction_offset() {
    let sps = SpsConfig::default();
    let pps = PpsConfig {
        weighted_pred: true,
        ..Default::default()
    };
    let idr = pcm_idr(&sps, &pps, 0, 100, 128);
    let cfg = SliceConfig {
        weight: Some(LumaWeight {
            log2_denom: 5,
            weight: 32,
            offset: 10,
        }),
        ..SliceConfig::p(1)
    };
    let mut w = SliceWriter::new(&sps, &pps, &cfg);
    w.skip(1);
    let stream = concat(&[&sps.nal(), &pps.nal(), &idr, &w.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let (_, pics) = decode_all(&mut dec, &stream);
    assert_eq!(pics.len(), 2);
    assert_luma_uniform(&pics[0], 100);
    assert_luma_uniform(&pics[1], 110);
    assert!(pics[1].planes[1].iter().all(|&v| v == 128), "色度使用默认权重");
}

#[test]
fn test_multi_slice_picture() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let mut s0 = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    s0.pcm(50, 128);
    let mut s1 = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0).at(1));
    s1.pcm(90, 128);
    let stream = concat(&[&sps.nal(), &pps.nal(), &s0.finish(), &s1.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let (state, pic, _) = feed(&mut dec, &stream, 0);
    assert!(state.is_error_free());
    assert!(pic.is_none());
    let pics = drain(&mut dec);
    assert_eq!(pics.len(), 1, "两个 slice 属于同一幅图像");
    assert_eq!(luma_at(&pics[0], 0, 0), 50);
    assert_eq!(luma_at(&pics[0], 31, 15), 90);
}

#[test]
fn test_slices_split_across_calls() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let mut s0 = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    s0.pcm(50, 128);
    let mut s1 = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0).at(1));
    s1.pcm(90, 128);

    let mut dec = open_decoder(EcActiveIdc::default());
    let first = concat(&[&sps.nal(), &pps.nal(), &s0.finish()]);
    let (state, pic, _) = feed(&mut dec, &first, 0);
    assert!(state.is_error_free() && pic.is_none());
    let (state, pic, _) = feed(&mut dec, &s1.finish(), 0);
    assert!(state.is_error_free() && pic.is_none(), "同一图像的后续 slice 不触发输出");
    let pics = drain(&mut dec);
    assert_eq!(pics.len(), 1);
    assert_eq!(luma_at(&pics[0], 16, 0), 90);
}

#[test]
fn test_cropping_applied_to_output() {
    let sps = SpsConfig {
        crop: Some([0, 4, 0, 4]),
        ..SpsConfig::with_mbs(2, 2)
    };
    let mut dec = open_decoder(EcActiveIdc::default());
    let mut info = BufferInfo::default();
    dec.decode_frame_no_delay(&pcm_idr_stream(&sps, 33, 44), &mut info);
    let pic = info.picture.expect("应输出图像");
    assert_eq!((pic.width, pic.height), (24, 24));
    assert_eq!(pic.strides, [24, 12, 12]);
    assert_eq!(pic.planes[0].len(), 24 * 24);
    assert_luma_uniform(&pic, 33);
}

#[test]
fn test_leading_garbage_is_skipped() {
    let stream = concat(&[&[0x12, 0x34, 0x56], &pcm_idr_stream(&SpsConfig::default(), 9, 128)]);
    let mut dec = open_decoder(EcActiveIdc::default());
    let mut info = BufferInfo::default();
    let state = dec.decode_frame_no_delay(&stream, &mut info);
    assert!(state.is_error_free());
    assert_luma_uniform(info.picture.as_ref().expect("应输出图像"), 9);
}

#[test]
fn test_trailing_garbage_byte_does_not_change_picture() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    w.i16x16_dc(1).i16x16_dc(-1);
    let stream = concat(&[&sps.nal(), &pps.nal(), &w.finish()]);

    let decode = |data: &[u8]| {
        let mut dec = open_decoder(EcActiveIdc::default());
        let mut info = BufferInfo::default();
        let state = dec.decode_frame_no_delay(data, &mut info);
        (state, info.picture.take())
    };
    let (state, clean) = decode(&stream);
    assert!(state.is_error_free(), "state={:?}", state);
    let clean = clean.expect("应输出图像");

    for garbage in [0xFFu8, 0x80, 0x01, 0x55] {
        let mut dirty = stream.clone();
        dirty.push(garbage);
        let (_, pic) = decode(&dirty);
        let pic = pic.unwrap_or_else(|| panic!("garbage={:#04x} 应输出图像", garbage));
        assert_eq!(pic.planes[0], clean.planes[0], "garbage={:#04x} 亮度应不变", garbage);
    }
}

#[test]
fn test_decode_is_deterministic() {
    let sps = SpsConfig::with_mbs(2, 2);
    let pps = PpsConfig::default();
    let stream = concat(&[
        &sps.nal(),
        &pps.nal(),
        &pcm_idr(&sps, &pps, 0, 70, 120),
        &skip_p(&sps, &pps, 1),
    ]);
    let run = || {
        let mut dec = open_decoder(EcActiveIdc::default());
        decode_all(&mut dec, &stream).1
    };
    let a = run();
    assert_eq!(a.len(), 2);
    assert_eq!(a, run(), "相同输入应得到相同输出");
}

#[test]
fn test_legacy_decode_frame() {
    let stream = pcm_idr_stream(&SpsConfig::default(), 60, 128);
    let mut dec = open_decoder(EcActiveIdc::default());
    let mut picture = None;
    let state = dec.decode_frame(&stream, &mut picture);
    assert!(state.is_error_free());
    assert!(picture.is_none());
    let state = dec.decode_frame(&[], &mut picture);
    assert!(state.is_error_free());
    assert_luma_uniform(picture.as_ref().expect("冲刷后应输出"), 60);
}

#[test]
fn test_decode_frame_no_delay_single_call() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut dec = open_decoder(EcActiveIdc::default());
    let mut info = BufferInfo::default();
    let head = concat(&[&sps.nal(), &pps.nal(), &pcm_idr(&sps, &pps, 0, 40, 128)]);
    dec.decode_frame_no_delay(&head, &mut info);
    assert_eq!(info.buffer_status, 1);

    // 每次调用都立即得到本次送入的图像
    for frame_num in 1..4 {
        info.in_bs_timestamp = u64::from(frame_num);
        let state = dec.decode_frame_no_delay(&skip_p(&sps, &pps, frame_num), &mut info);
        assert!(state.is_error_free());
        assert_eq!(info.buffer_status, 1);
        assert_eq!(info.out_yuv_timestamp, u64::from(frame_num));
    }
}

#[test]
fn test_decoder_trait_roundtrip() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut dec = H264Decoder::new();
    assert!(matches!(dec.send_packet(&Packet::empty()), Err(TaoError::NeedMoreData)));

    dec.open(&test_params(EcActiveIdc::default())).expect("打开应成功");
    assert_eq!(dec.name(), "h264");
    let idr = concat(&[&sps.nal(), &pps.nal(), &pcm_idr(&sps, &pps, 0, 80, 128)]);
    dec.send_packet(&Packet::from_data(idr).with_pts(5)).expect("送包应成功");
    assert!(matches!(dec.receive_frame(), Err(TaoError::NeedMoreData)));

    dec.send_packet(&Packet::from_data(skip_p(&sps, &pps, 1)).with_pts(6))
        .expect("送包应成功");
    let Frame::Video(frame) = dec.receive_frame().expect("应取出 IDR");
    assert_eq!(frame.pts, 5);
    assert!(frame.is_keyframe);
    assert_eq!(frame.picture_type, PictureType::I);
    assert_eq!(frame.sample_aspect_ratio, (1, 1));
    assert_eq!(frame.sample(0, 3, 3), Some(80));

    dec.send_packet(&Packet::empty()).expect("冲刷应成功");
    let Frame::Video(frame) = dec.receive_frame().expect("冲刷后应取出 P 帧");
    assert_eq!(frame.pts, 6);
    assert!(!frame.is_keyframe);
    assert_eq!(frame.picture_type, PictureType::P);
    assert!(matches!(dec.receive_frame(), Err(TaoError::Eof)));

    dec.flush();
    assert!(matches!(dec.receive_frame(), Err(TaoError::NeedMoreData)));
}

#[test]
fn test_decoder_trait_reports_out_of_memory() {
    let mut dec = H264Decoder::new();
    dec.open(&test_params(EcActiveIdc::default())).expect("打开应成功");
    let huge = vec![0x55u8; test_params(EcActiveIdc::default()).max_bitstream_bytes() + 1];
    assert!(matches!(
        dec.send_packet(&Packet::from_data(huge)),
        Err(TaoError::OutOfMemory(_))
    ));
}

#[test]
fn test_redundant_slice_is_ignored() {
    let sps = SpsConfig::default();
    let pps = PpsConfig {
        redundant_pic_cnt_present: true,
        ..Default::default()
    };
    let mut primary = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    primary.pcm(50, 128);
    let redundant_cfg = SliceConfig {
        redundant_pic_cnt: 1,
        ..SliceConfig::idr(0)
    };
    let mut redundant = SliceWriter::new(&sps, &pps, &redundant_cfg);
    redundant.pcm(99, 128);
    let stream = concat(&[&sps.nal(), &pps.nal(), &primary.finish(), &redundant.finish()]);

    let mut dec = open_decoder(EcActiveIdc::default());
    let (state, pics) = decode_all(&mut dec, &stream);
    assert!(state.is_error_free());
    assert_eq!(pics.len(), 1);
    assert_luma_uniform(&pics[0], 50);
}
