use super::super::{CmResult, DecodingParam, DecodingState, EcActiveIdc, H264Decoder, ParserBsInfo};
use super::helpers::*;

fn open_parser() -> H264Decoder {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut dec = H264Decoder::new();
    let params = DecodingParam {
        parse_only: true,
        ..test_params(EcActiveIdc::Disable)
    };
    assert_eq!(dec.initialize(&params), CmResult::Success);
    dec
}

fn parse(dec: &mut H264Decoder, data: &[u8], ts: u64) -> (DecodingState, ParserBsInfo) {
    let mut info = ParserBsInfo {
        in_bs_timestamp: ts,
        ..Default::default()
    };
    let state = dec.decode_parser(data, &mut info);
    (state, info)
}

#[test]
fn test_parser_reports_nal_lengths_per_access_unit() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let sps_nal = sps.nal();
    let pps_nal = pps.nal();
    let idr = pcm_idr(&sps, &pps, 0, 10, 128);
    let p = skip_p(&sps, &pps, 1);

    let mut dec = open_parser();
    let (state, info) = parse(&mut dec, &concat(&[&sps_nal, &pps_nal, &idr]), 5);
    assert!(state.is_error_free(), "state={:?}", state);
    assert_eq!(info.nal_num, 0, "访问单元尚未结束");

    let (state, info) = parse(&mut dec, &p, 6);
    assert!(state.is_error_free());
    assert_eq!(info.nal_num, 3);
    assert_eq!(info.nal_len_in_byte, vec![sps_nal.len(), pps_nal.len(), idr.len()]);
    assert_eq!((info.sps_width_in_pixel, info.sps_height_in_pixel), (32, 16));
    assert_eq!(info.out_bs_timestamp, 5);
    assert_eq!(info.in_bs_timestamp, 6);

    // 空输入结束最后一个访问单元
    let (_, info) = parse(&mut dec, &[], 0);
    assert_eq!(info.nal_num, 1);
    assert_eq!(info.nal_len_in_byte, vec![p.len()]);
    assert_eq!(info.out_bs_timestamp, 6);

    let (_, info) = parse(&mut dec, &[], 0);
    assert_eq!(info.nal_num, 0);
    assert!(info.nal_len_in_byte.is_empty());
}

#[test]
fn test_parser_groups_slices_and_delimiters() {
    let sps = SpsConfig::with_mbs(2, 1);
    let pps = PpsConfig::default();
    let mut first = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0));
    first.pcm(10, 128);
    let mut second = SliceWriter::new(&sps, &pps, &SliceConfig::idr(0).at(1));
    second.pcm(20, 128);
    let (first, second) = (first.finish(), second.finish());
    let delimiter = aud();

    let mut dec = open_parser();
    parse(&mut dec, &concat(&[&sps.nal(), &pps.nal(), &first, &second]), 1);
    let (_, info) = parse(&mut dec, &delimiter, 2);
    assert_eq!(info.nal_num, 4, "同一图像的两个 slice 属于同一访问单元");
    assert_eq!(info.nal_len_in_byte[2..], [first.len(), second.len()]);

    // AUD 开启新的访问单元
    parse(&mut dec, &skip_p(&sps, &pps, 1), 3);
    let (_, info) = parse(&mut dec, &[], 0);
    assert_eq!(info.nal_num, 2);
    assert_eq!(info.nal_len_in_byte[0], delimiter.len());
}

#[test]
fn test_parser_splits_at_sei_after_slice() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let idr = pcm_idr(&sps, &pps, 0, 10, 128);
    let message = sei();
    let p = skip_p(&sps, &pps, 1);

    let mut dec = open_parser();
    let (_, info) = parse(&mut dec, &concat(&[&sps.nal(), &pps.nal(), &idr, &message]), 1);
    assert_eq!(info.nal_num, 3, "slice 之后的 SEI 结束上一个访问单元");
    assert_eq!(info.nal_len_in_byte[2], idr.len());

    parse(&mut dec, &p, 2);
    let (_, info) = parse(&mut dec, &[], 0);
    assert_eq!(info.nal_len_in_byte, vec![message.len(), p.len()], "SEI 归入下一个访问单元");
}

#[test]
fn test_parser_counts_frames_without_reconstruction() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut dec = open_parser();
    parse(&mut dec, &concat(&[&sps.nal(), &pps.nal(), &pcm_idr(&sps, &pps, 0, 10, 128)]), 0);
    // 损坏的宏块层不影响仅解析模式
    let mut w = SliceWriter::new(&sps, &pps, &SliceConfig::p(1));
    w.mb_type_raw(40);
    let (state, info) = parse(&mut dec, &w.finish(), 0);
    assert!(state.is_error_free(), "state={:?}", state);
    assert_eq!(info.nal_num, 3);
    let (state, info) = parse(&mut dec, &[], 0);
    assert!(state.is_error_free());
    assert_eq!(info.nal_num, 1);
}

#[test]
fn test_parser_reports_missing_parameter_sets() {
    let sps = SpsConfig::default();
    let pps = PpsConfig::default();
    let mut dec = open_parser();
    let (state, _) = parse(&mut dec, &pcm_idr(&sps, &pps, 0, 10, 128), 0);
    assert!(state.contains(DecodingState::NO_PARAM_SETS), "state={:?}", state);
    let (_, info) = parse(&mut dec, &[], 0);
    assert_eq!(info.nal_num, 1, "出错的访问单元仍报告长度");
    assert_eq!((info.sps_width_in_pixel, info.sps_height_in_pixel), (0, 0));
}
