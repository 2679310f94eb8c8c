//! 解码后的帧数据 (Frame).
//!
//! 表示解码后的 YUV 4:2:0 平面数据, 平面已按显示尺寸裁剪并紧密排列.

/// 视频帧
///
/// 固定为 3 个平面: Y, U, V.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: [Vec<u8>; 3],
    /// 各平面每行的字节数 (linesize / stride)
    pub linesize: [usize; 3],
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 显示时间戳 (PTS), 沿用输入包的时间戳
    pub pts: i64,
    /// 是否为关键帧 (IDR)
    pub is_keyframe: bool,
    /// 图片类型
    pub picture_type: PictureType,
    /// 采样宽高比 (sar_width, sar_height), 未知时为 (1, 1)
    pub sample_aspect_ratio: (u32, u32),
}

impl VideoFrame {
    /// 创建全零的 4:2:0 视频帧
    pub fn new(width: u32, height: u32) -> Self {
        let cw = width.div_ceil(2) as usize;
        let ch = height.div_ceil(2) as usize;
        let w = width as usize;
        let h = height as usize;
        Self {
            data: [vec![0; w * h], vec![0; cw * ch], vec![0; cw * ch]],
            linesize: [w, cw, cw],
            width,
            height,
            pts: 0,
            is_keyframe: false,
            picture_type: PictureType::None,
            sample_aspect_ratio: (1, 1),
        }
    }

    /// 读取指定平面的像素, 越界返回 `None`
    pub fn sample(&self, plane: usize, x: usize, y: usize) -> Option<u8> {
        let stride = *self.linesize.get(plane)?;
        if x >= stride {
            return None;
        }
        self.data.get(plane)?.get(y * stride + x).copied()
    }
}

/// 帧 (解码输出的统一包装)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 视频帧
    Video(VideoFrame),
}

/// 图片类型 (I/P 帧)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// 未指定
    #[default]
    None,
    /// I 帧 (帧内编码)
    I,
    /// P 帧 (前向预测)
    P,
}
