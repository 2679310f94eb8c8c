//! 解码统计.
//!
//! 计数器单调递增, 只有在 `decoded_frame_count` 溢出或显式重置时清零.

use log::info;

/// 解码统计快照
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecoderStatistics {
    /// 当前图像宽度
    pub width: u32,
    /// 当前图像高度
    pub height: u32,
    /// 平均单帧解码耗时 (毫秒)
    pub average_frame_speed_ms: f32,
    /// 计入冻结帧后的平均单帧耗时 (毫秒)
    pub actual_average_frame_speed_ms: f32,
    /// 已输出帧数
    pub decoded_frame_count: u32,
    /// 分辨率变化次数
    pub resolution_change_times: u32,
    /// 正确解码的 IDR 数
    pub idr_correct_num: u32,
    /// 平均隐藏宏块比例 (百分比)
    pub avg_ec_ratio: u32,
    /// 平均传播隐藏宏块比例 (百分比)
    pub avg_ec_prop_ratio: u32,
    /// 被隐藏的 IDR 数
    pub ec_idr_num: u32,
    /// 含隐藏宏块的帧数
    pub ec_frame_num: u32,
    /// 丢失的 IDR 数
    pub idr_lost_num: u32,
    /// 冻结的 IDR 数
    pub freezing_idr_num: u32,
    /// 冻结的非 IDR 帧数
    pub freezing_non_idr_num: u32,
    /// 平均亮度 QP
    pub avg_luma_qp: i32,
    /// SPS 解析错误数
    pub sps_report_error_num: i32,
    /// PPS 解析错误数
    pub pps_report_error_num: i32,
    /// 引用不存在的 SPS 的次数
    pub sps_no_exist_nal_num: i32,
    /// 引用不存在的 PPS 的次数
    pub pps_no_exist_nal_num: i32,
    /// 当前 profile_idc
    pub profile: u32,
    /// 当前 level_idc
    pub level: u32,
    /// 当前激活的 SPS id, -1 表示无
    pub current_active_sps_id: i32,
    /// 当前激活的 PPS id, -1 表示无
    pub current_active_pps_id: i32,
    /// 统计日志间隔 (帧)
    pub statistics_log_interval: u32,
}

impl DecoderStatistics {
    /// 创建初始统计
    pub fn new(statistics_log_interval: u32) -> Self {
        Self {
            current_active_sps_id: -1,
            current_active_pps_id: -1,
            statistics_log_interval,
            ..Self::default()
        }
    }

    /// 清零计数器, 保留分辨率、平均 QP、码流描述与日志间隔
    pub fn reset_counts(&mut self) {
        let kept = Self {
            width: self.width,
            height: self.height,
            avg_luma_qp: self.avg_luma_qp,
            profile: self.profile,
            level: self.level,
            current_active_sps_id: self.current_active_sps_id,
            current_active_pps_id: self.current_active_pps_id,
            statistics_log_interval: self.statistics_log_interval,
            ..Self::default()
        };
        *self = kept;
    }

    /// 记录一帧输出, 计数溢出时先清零再计入当前帧
    pub fn count_decoded_frame(&mut self) {
        self.decoded_frame_count = self.decoded_frame_count.wrapping_add(1);
        if self.decoded_frame_count == 0 {
            self.reset_counts();
            self.decoded_frame_count = 1;
        }
    }

    /// 记录一帧隐藏结果, 更新平均隐藏比例
    ///
    /// `concealed_mbs` 含传播隐藏的宏块, `propagated_mbs` 仅为传播部分.
    pub fn record_concealment(&mut self, concealed_mbs: u32, propagated_mbs: u32, mb_num: u32) {
        let frames = u64::from(self.ec_frame_num);
        let mut ratio = u64::from(self.avg_ec_ratio) * frames;
        let mut prop_ratio = u64::from(self.avg_ec_prop_ratio) * frames;
        if mb_num != 0 {
            ratio += u64::from(concealed_mbs) * 100 / u64::from(mb_num);
            prop_ratio += u64::from(propagated_mbs) * 100 / u64::from(mb_num);
        }
        if concealed_mbs != 0 {
            self.ec_frame_num = self.ec_frame_num.saturating_add(1);
        }
        if self.ec_frame_num == 0 {
            self.avg_ec_ratio = 0;
            self.avg_ec_prop_ratio = 0;
        } else {
            let n = u64::from(self.ec_frame_num);
            self.avg_ec_ratio = (ratio / n) as u32;
            self.avg_ec_prop_ratio = (prop_ratio / n) as u32;
        }
    }

    /// 用当前帧的平均 QP 更新累计平均值
    pub fn update_avg_luma_qp(&mut self, frame_qp: i32) {
        let n = i64::from(self.decoded_frame_count);
        let total = i64::from(self.avg_luma_qp) * n + i64::from(frame_qp);
        self.avg_luma_qp = (total / (n + 1)) as i32;
    }

    /// 依据累计耗时生成快照
    pub fn snapshot(&self, total_decode_ms: f64) -> Self {
        let mut out = self.clone();
        if self.decoded_frame_count != 0 {
            let frames = f64::from(self.decoded_frame_count);
            out.average_frame_speed_ms = (total_decode_ms / frames) as f32;
            let actual = frames
                + f64::from(self.freezing_idr_num)
                + f64::from(self.freezing_non_idr_num);
            out.actual_average_frame_speed_ms = (total_decode_ms / actual) as f32;
        }
        out
    }

    /// 是否到达日志输出点
    pub fn should_log(&self) -> bool {
        self.decoded_frame_count > 0
            && self.statistics_log_interval > 0
            && self.decoded_frame_count % self.statistics_log_interval == 0
    }

    /// 输出统计日志
    pub fn log_summary(&self) {
        info!(
            "H264: 解码统计 width={}, height={}, avg_ms={:.1}, actual_avg_ms={:.1}, decoded={}, res_change={}, idr_correct={}, ec_ratio={}, ec_prop_ratio={}, ec_idr={}, ec_frames={}, idr_lost={}, freeze_idr={}, freeze_non_idr={}, avg_qp={}, sps_err={}, pps_err={}, sps_missing={}, pps_missing={}, profile={}, level={}, sps_id={}, pps_id={}",
            self.width,
            self.height,
            self.average_frame_speed_ms,
            self.actual_average_frame_speed_ms,
            self.decoded_frame_count,
            self.resolution_change_times,
            self.idr_correct_num,
            self.avg_ec_ratio,
            self.avg_ec_prop_ratio,
            self.ec_idr_num,
            self.ec_frame_num,
            self.idr_lost_num,
            self.freezing_idr_num,
            self.freezing_non_idr_num,
            self.avg_luma_qp,
            self.sps_report_error_num,
            self.pps_report_error_num,
            self.sps_no_exist_nal_num,
            self.pps_no_exist_nal_num,
            self.profile,
            self.level,
            self.current_active_sps_id,
            self.current_active_pps_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_frame_count_overflow_resets() {
        let mut stats = DecoderStatistics::new(5);
        stats.width = 320;
        stats.ec_frame_num = 7;
        stats.decoded_frame_count = u32::MAX;
        stats.count_decoded_frame();
        assert_eq!(stats.decoded_frame_count, 1, "溢出后应清零并计入当前帧");
        assert_eq!(stats.ec_frame_num, 0);
        assert_eq!(stats.width, 320, "分辨率不随计数清零");
        assert_eq!(stats.statistics_log_interval, 5);
    }

    #[test]
    fn test_ec_ratio_running_average() {
        let mut stats = DecoderStatistics::new(0);
        // 100 个宏块中隐藏 50 个
        stats.record_concealment(50, 0, 100);
        assert_eq!(stats.ec_frame_num, 1);
        assert_eq!(stats.avg_ec_ratio, 50);
        // 第二帧隐藏 10 个
        stats.record_concealment(10, 10, 100);
        assert_eq!(stats.ec_frame_num, 2);
        assert_eq!(stats.avg_ec_ratio, 30);
        assert_eq!(stats.avg_ec_prop_ratio, 5);
        // 无隐藏宏块不计入帧数
        stats.record_concealment(0, 0, 100);
        assert_eq!(stats.ec_frame_num, 2);
        assert_eq!(stats.avg_ec_ratio, 30);
    }

    #[test]
    fn test_snapshot_speed() {
        let mut stats = DecoderStatistics::new(0);
        stats.decoded_frame_count = 4;
        stats.freezing_non_idr_num = 4;
        let snap = stats.snapshot(40.0);
        assert!((snap.average_frame_speed_ms - 10.0).abs() < 1e-6);
        assert!((snap.actual_average_frame_speed_ms - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_should_log_interval() {
        let mut stats = DecoderStatistics::new(2);
        stats.count_decoded_frame();
        assert!(!stats.should_log());
        stats.count_decoded_frame();
        assert!(stats.should_log());
    }
}
