//! 图像缓冲与帧缓冲池.
//!
//! 池中的每个槽位以 `PicHandle` 寻址并带引用计数. 正在解码的图像从池中
//! 取出 (持有一次引用), 完成后放回; 参考列表与输出队列各自再持有引用,
//! 两者都释放后槽位回到空闲状态, 平面内存留给下一幅同尺寸图像复用.

use log::debug;
use tao_core::{TaoError, TaoResult};

use super::common::copy_plane;
use super::config::YuvPicture;
use crate::frame::PictureType;

// ============================================================
// 图像
// ============================================================

/// 显示裁剪窗口 (亮度像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct CropWindow {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

/// 一幅 4:2:0 图像
#[derive(Debug, Clone)]
pub(super) struct Picture {
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
    pub mb_width: usize,
    pub mb_height: usize,
    pub crop: CropWindow,
    /// 池内唯一标识, 参考图像比较用
    pub id: i64,
    pub frame_num: u32,
    pub poc: i32,
    pub is_idr: bool,
    pub picture_type: PictureType,
    pub timestamp: u64,
    /// 含有被隐藏的宏块
    pub concealed: bool,
    /// 每个宏块 4x4 块 0 的运动矢量, 帧内宏块为 `None`
    pub mb_motion: Vec<Option<[i16; 2]>>,
}

impl Picture {
    fn allocate(mb_width: usize, mb_height: usize) -> TaoResult<Self> {
        let w = mb_width * 16;
        let h = mb_height * 16;
        let luma = alloc_plane(w * h)?;
        let cb = alloc_plane(w * h / 4)?;
        let cr = alloc_plane(w * h / 4)?;
        let mut mb_motion = Vec::new();
        mb_motion
            .try_reserve_exact(mb_width * mb_height)
            .map_err(|_| TaoError::OutOfMemory(format!("H264: 宏块运动表分配失败, mbs={}", mb_width * mb_height)))?;
        mb_motion.resize(mb_width * mb_height, None);
        Ok(Self {
            planes: [luma, cb, cr],
            strides: [w, w / 2, w / 2],
            mb_width,
            mb_height,
            crop: CropWindow {
                left: 0,
                top: 0,
                width: w,
                height: h,
            },
            id: -1,
            frame_num: 0,
            poc: 0,
            is_idr: false,
            picture_type: PictureType::None,
            timestamp: 0,
            concealed: false,
            mb_motion,
        })
    }

    /// 亮度宽度 (宏块对齐)
    pub(super) fn width(&self) -> usize {
        self.mb_width * 16
    }

    /// 亮度高度 (宏块对齐)
    pub(super) fn height(&self) -> usize {
        self.mb_height * 16
    }

    /// 平面 `c` 的 (宽, 高)
    pub(super) fn plane_size(&self, c: usize) -> (usize, usize) {
        if c == 0 {
            (self.width(), self.height())
        } else {
            (self.width() / 2, self.height() / 2)
        }
    }

    /// 用常数填充整幅图像
    #[cfg(test)]
    pub(super) fn fill(&mut self, luma: u8, chroma: u8) {
        self.planes[0].fill(luma);
        self.planes[1].fill(chroma);
        self.planes[2].fill(chroma);
    }

    /// 从同尺寸图像复制一个宏块 (3 个平面)
    pub(super) fn copy_mb_from(&mut self, src: &Picture, mb_x: usize, mb_y: usize) {
        if src.mb_width != self.mb_width || src.mb_height != self.mb_height {
            return;
        }
        for c in 0..3 {
            let size = if c == 0 { 16 } else { 8 };
            let stride = self.strides[c];
            for row in 0..size {
                let off = (mb_y * size + row) * stride + mb_x * size;
                let (Some(dst), Some(from)) = (
                    self.planes[c].get_mut(off..off + size),
                    src.planes[c].get(off..off + size),
                ) else {
                    return;
                };
                dst.copy_from_slice(from);
            }
        }
    }

    /// 按裁剪窗口生成紧凑排列的输出图像
    pub(super) fn to_yuv(&self) -> YuvPicture {
        let crop = self.crop;
        let mut planes: [Vec<u8>; 3] = Default::default();
        let mut strides = [0usize; 3];
        for c in 0..3 {
            let (x, y, w, h) = if c == 0 {
                (crop.left, crop.top, crop.width, crop.height)
            } else {
                (crop.left / 2, crop.top / 2, crop.width.div_ceil(2), crop.height.div_ceil(2))
            };
            let stride = self.strides[c];
            let start = (y * stride + x).min(self.planes[c].len());
            planes[c] = copy_plane(&self.planes[c][start..], stride, w, h);
            strides[c] = w;
        }
        YuvPicture {
            planes,
            strides,
            width: crop.width as u32,
            height: crop.height as u32,
        }
    }
}

fn alloc_plane(len: usize) -> TaoResult<Vec<u8>> {
    let mut plane = Vec::new();
    plane
        .try_reserve_exact(len)
        .map_err(|_| TaoError::OutOfMemory(format!("H264: 图像平面分配失败, bytes={}", len)))?;
    plane.resize(len, 0);
    Ok(plane)
}

// ============================================================
// 缓冲池
// ============================================================

/// 缓冲池中图像的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct PicHandle(usize);

#[derive(Debug, Default)]
struct Slot {
    /// 正在解码时为 `None`
    picture: Option<Picture>,
    refs: u32,
}

/// 引用计数的帧缓冲池
#[derive(Debug)]
pub(super) struct FramePool {
    slots: Vec<Slot>,
    capacity: usize,
    next_id: i64,
}

impl FramePool {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    /// 取出一个空闲槽位用于解码, 返回的图像持有一次引用
    pub(super) fn acquire(&mut self, mb_width: usize, mb_height: usize) -> TaoResult<(PicHandle, Picture)> {
        let free = self.slots.iter().position(|slot| slot.refs == 0);
        let index = match free {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => {
                return Err(TaoError::OutOfMemory(format!(
                    "H264: 帧缓冲池耗尽, capacity={}",
                    self.capacity
                )));
            }
        };
        let slot = &mut self.slots[index];
        let reusable = slot
            .picture
            .take()
            .filter(|pic| pic.mb_width == mb_width && pic.mb_height == mb_height);
        let mut picture = match reusable {
            Some(pic) => pic,
            None => {
                debug!("H264: 分配图像缓冲, slot={}, mbs={}x{}", index, mb_width, mb_height);
                Picture::allocate(mb_width, mb_height)?
            }
        };
        slot.refs = 1;
        picture.id = self.next_id;
        picture.concealed = false;
        picture.mb_motion.fill(None);
        self.next_id += 1;
        Ok((PicHandle(index), picture))
    }

    /// 解码结束后把图像放回槽位
    pub(super) fn restore(&mut self, handle: PicHandle, picture: Picture) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            slot.picture = Some(picture);
        }
    }

    pub(super) fn retain(&mut self, handle: PicHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            slot.refs += 1;
        }
    }

    pub(super) fn release(&mut self, handle: PicHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            slot.refs = slot.refs.saturating_sub(1);
        }
    }

    pub(super) fn get(&self, handle: PicHandle) -> Option<&Picture> {
        self.slots.get(handle.0)?.picture.as_ref()
    }

    /// 被引用的槽位数
    #[cfg(test)]
    pub(super) fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.refs > 0).count()
    }

    /// 释放全部缓冲
    pub(super) fn clear(&mut self) {
        self.slots.clear();
    }
}
