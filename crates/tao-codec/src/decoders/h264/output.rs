//! 输出队列.
//!
//! 图像按解码顺序排队 (不做 POC 重排). 队列持有缓冲池引用,
//! 取出时转换为紧凑的 `YuvPicture` 并释放引用.

use std::collections::VecDeque;

use crate::frame::PictureType;

use super::config::YuvPicture;
use super::picture::{FramePool, PicHandle};

#[derive(Debug, Clone, Copy)]
struct OutputEntry {
    handle: PicHandle,
    timestamp: u64,
    concealed: bool,
}

/// 出队的一幅图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct OutputPicture {
    pub picture: YuvPicture,
    pub timestamp: u64,
    pub concealed: bool,
    pub picture_type: PictureType,
    pub is_idr: bool,
}

#[derive(Debug, Default)]
pub(super) struct OutputQueue {
    entries: VecDeque<OutputEntry>,
}

impl OutputQueue {
    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 入队并为图像增加一次引用
    pub(super) fn push(&mut self, pool: &mut FramePool, handle: PicHandle, timestamp: u64, concealed: bool) {
        pool.retain(handle);
        self.entries.push_back(OutputEntry {
            handle,
            timestamp,
            concealed,
        });
    }

    /// 取出最早的一幅图像
    pub(super) fn pop(&mut self, pool: &mut FramePool) -> Option<OutputPicture> {
        while let Some(entry) = self.entries.pop_front() {
            let converted = pool
                .get(entry.handle)
                .map(|pic| (pic.to_yuv(), pic.picture_type, pic.is_idr));
            pool.release(entry.handle);
            if let Some((picture, picture_type, is_idr)) = converted {
                return Some(OutputPicture {
                    picture,
                    timestamp: entry.timestamp,
                    concealed: entry.concealed,
                    picture_type,
                    is_idr,
                });
            }
        }
        None
    }

    /// 丢弃全部待输出图像 (no_output_of_prior_pics 或复位)
    pub(super) fn clear(&mut self, pool: &mut FramePool) {
        for entry in self.entries.drain(..) {
            pool.release(entry.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(pool: &mut FramePool, luma: u8) -> PicHandle {
        let (h, mut pic) = pool.acquire(1, 1).expect("分配应成功");
        pic.fill(luma, 128);
        pool.restore(h, pic);
        h
    }

    #[test]
    fn test_fifo_order_and_release() {
        let mut pool = FramePool::new(3);
        let mut queue = OutputQueue::default();
        let a = decoded(&mut pool, 10);
        let b = decoded(&mut pool, 20);
        queue.push(&mut pool, a, 100, false);
        queue.push(&mut pool, b, 200, true);
        pool.release(a);
        pool.release(b);
        assert_eq!(queue.len(), 2);

        let first = queue.pop(&mut pool).expect("应有输出");
        assert_eq!(first.timestamp, 100);
        assert_eq!(first.picture.planes[0][0], 10);
        assert!(!first.concealed);
        assert_eq!(pool.in_use(), 1, "出队后释放引用");

        let second = queue.pop(&mut pool).expect("应有输出");
        assert!(second.concealed);
        assert!(queue.pop(&mut pool).is_none());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut pool = FramePool::new(2);
        let mut queue = OutputQueue::default();
        let a = decoded(&mut pool, 1);
        queue.push(&mut pool, a, 0, false);
        pool.release(a);
        queue.clear(&mut pool);
        assert!(queue.is_empty());
        assert_eq!(pool.in_use(), 0);
    }
}
