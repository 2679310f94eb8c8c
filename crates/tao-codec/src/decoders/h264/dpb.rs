//! 参考图像管理: 标记 (8.2.5), P slice 参考列表初始化与修改 (8.2.4),
//! 以及 frame_num 间隙的非存在帧 (8.2.5.2).
//!
//! 参考图像以缓冲池句柄保存, 进入参考集时 `retain`, 移出时 `release`.
//! 间隙产生的非存在帧没有句柄, 被引用时视为参考丢失.

use log::{debug, warn};

use super::picture::{FramePool, PicHandle};
use super::slice_parse::{DecRefPicMarking, MmcoOp, RefPicListMod};

/// 参考集中的一帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RefPicture {
    /// `None` 表示 frame_num 间隙产生的非存在帧
    pub handle: Option<PicHandle>,
    pub frame_num: u32,
    pub long_term_idx: Option<u32>,
}

impl RefPicture {
    fn is_short_term(&self) -> bool {
        self.long_term_idx.is_none()
    }
}

/// 参考列表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RefListEntry {
    pub handle: Option<PicHandle>,
    /// 用于去块比较参考是否相同的标识
    pub frame_num: u32,
    pub long_term: bool,
}

/// 当前图像参考标记的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct MarkingOutcome {
    pub mmco5: bool,
    /// IDR 要求丢弃尚未输出的图像
    pub no_output_of_prior_pics: bool,
}

/// 解码图像缓冲中的参考部分
#[derive(Debug, Default)]
pub(super) struct Dpb {
    refs: Vec<RefPicture>,
    max_long_term_idx: Option<u32>,
    max_num_ref_frames: usize,
    max_frame_num: u32,
    /// 上一参考图像的 frame_num (MMCO5 后为 0)
    prev_ref_frame_num: Option<u32>,
}

impl Dpb {
    /// 激活新的 SPS 时调用
    pub(super) fn configure(&mut self, max_num_ref_frames: u32, max_frame_num: u32) {
        self.max_num_ref_frames = (max_num_ref_frames as usize).max(1);
        self.max_frame_num = max_frame_num.max(1);
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.refs.len()
    }

    #[cfg(test)]
    pub(super) fn refs(&self) -> &[RefPicture] {
        &self.refs
    }

    #[cfg(test)]
    pub(super) fn prev_ref_frame_num(&self) -> Option<u32> {
        self.prev_ref_frame_num
    }

    /// 释放全部参考
    pub(super) fn clear(&mut self, pool: &mut FramePool) {
        for r in self.refs.drain(..) {
            if let Some(h) = r.handle {
                pool.release(h);
            }
        }
        self.max_long_term_idx = None;
        self.prev_ref_frame_num = None;
    }

    /// FrameNumWrap (8-27)
    fn frame_num_wrap(&self, frame_num: u32, cur_frame_num: u32) -> i32 {
        if frame_num > cur_frame_num {
            frame_num as i32 - self.max_frame_num as i32
        } else {
            frame_num as i32
        }
    }

    // ============================================================
    // 参考列表
    // ============================================================

    /// 构建 P slice 的 RefPicList0
    ///
    /// 短期参考按 PicNum 降序, 长期参考按 LongTermPicNum 升序, 修改后截断到
    /// `num_active`; 不足部分以 `None` 填充.
    pub(super) fn build_list_p(
        &self,
        cur_frame_num: u32,
        num_active: usize,
        mods: &[RefPicListMod],
    ) -> Vec<Option<RefListEntry>> {
        let mut short: Vec<&RefPicture> = self.refs.iter().filter(|r| r.is_short_term()).collect();
        short.sort_by_key(|r| std::cmp::Reverse(self.frame_num_wrap(r.frame_num, cur_frame_num)));
        let mut long: Vec<&RefPicture> = self.refs.iter().filter(|r| !r.is_short_term()).collect();
        long.sort_by_key(|r| r.long_term_idx);

        let mut list: Vec<Option<RefListEntry>> = short
            .into_iter()
            .chain(long)
            .map(|r| Some(to_entry(r)))
            .collect();
        list.resize(num_active, None);
        if !mods.is_empty() {
            self.modify_list(&mut list, cur_frame_num, num_active, mods);
        }
        list
    }

    /// 8.2.4.3: 依次把选中的图像插入到 refIdxLX 处, 再删除其后的重复项
    fn modify_list(
        &self,
        list: &mut Vec<Option<RefListEntry>>,
        cur_frame_num: u32,
        num_active: usize,
        mods: &[RefPicListMod],
    ) {
        let max = self.max_frame_num as i32;
        let cur_pic_num = cur_frame_num as i32;
        let mut pred = cur_pic_num;
        for (ref_idx, m) in mods.iter().enumerate() {
            let picked = match *m {
                RefPicListMod::ShortTermSub { abs_diff_pic_num_minus1 }
                | RefPicListMod::ShortTermAdd { abs_diff_pic_num_minus1 } => {
                    let diff = abs_diff_pic_num_minus1 as i32 + 1;
                    let mut no_wrap = if matches!(m, RefPicListMod::ShortTermSub { .. }) {
                        pred - diff
                    } else {
                        pred + diff
                    };
                    if no_wrap < 0 {
                        no_wrap += max;
                    } else if no_wrap >= max {
                        no_wrap -= max;
                    }
                    pred = no_wrap;
                    let pic_num = if no_wrap > cur_pic_num { no_wrap - max } else { no_wrap };
                    self.refs
                        .iter()
                        .find(|r| r.is_short_term() && self.frame_num_wrap(r.frame_num, cur_frame_num) == pic_num)
                }
                RefPicListMod::LongTerm { long_term_pic_num } => {
                    self.refs.iter().find(|r| r.long_term_idx == Some(long_term_pic_num))
                }
            };
            let Some(picked) = picked else {
                warn!("H264: 参考列表修改目标不存在, ref_idx={}, op={:?}", ref_idx, m);
                list.insert(ref_idx.min(list.len()), None);
                list.truncate(num_active);
                continue;
            };
            let entry = Some(to_entry(picked));
            list.insert(ref_idx.min(list.len()), entry);
            let mut keep = ref_idx + 1;
            for i in (ref_idx + 1)..list.len() {
                if list[i] != entry {
                    list[keep] = list[i];
                    keep += 1;
                }
            }
            list.truncate(keep.min(num_active));
            list.resize(num_active, None);
        }
    }

    // ============================================================
    // 参考标记
    // ============================================================

    /// 当前参考图像解码完成后执行标记并把它加入参考集
    pub(super) fn mark_current(
        &mut self,
        pool: &mut FramePool,
        handle: PicHandle,
        frame_num: u32,
        is_idr: bool,
        marking: &DecRefPicMarking,
    ) -> MarkingOutcome {
        let mut outcome = MarkingOutcome::default();
        let mut current_long = None;

        if is_idr {
            self.clear(pool);
            outcome.no_output_of_prior_pics = marking.no_output_of_prior_pics;
            if marking.long_term_reference_flag {
                self.max_long_term_idx = Some(0);
                current_long = Some(0);
            }
        } else if marking.adaptive {
            for op in marking.ops.iter() {
                match *op {
                    MmcoOp::ForgetShort { difference_of_pic_nums_minus1 } => {
                        let pic_num = frame_num as i32 - (difference_of_pic_nums_minus1 as i32 + 1);
                        if let Some(i) = self.find_short(pic_num, frame_num) {
                            self.remove_at(pool, i);
                        }
                    }
                    MmcoOp::ForgetLong { long_term_pic_num } => {
                        if let Some(i) = self.find_long(long_term_pic_num) {
                            self.remove_at(pool, i);
                        }
                    }
                    MmcoOp::ConvertShortToLong {
                        difference_of_pic_nums_minus1,
                        long_term_frame_idx,
                    } => {
                        let pic_num = frame_num as i32 - (difference_of_pic_nums_minus1 as i32 + 1);
                        let target = self.find_short(pic_num, frame_num).map(|i| self.refs[i]);
                        if let Some(i) = self.find_long(long_term_frame_idx) {
                            if Some(self.refs[i]) != target {
                                self.remove_at(pool, i);
                            }
                        }
                        if let Some(i) = self.find_short(pic_num, frame_num) {
                            self.refs[i].long_term_idx = Some(long_term_frame_idx);
                        }
                    }
                    MmcoOp::TrimLong { max_long_term_frame_idx_plus1 } => {
                        self.max_long_term_idx = max_long_term_frame_idx_plus1.checked_sub(1);
                        let max = self.max_long_term_idx;
                        let mut i = 0;
                        while i < self.refs.len() {
                            let over = self.refs[i]
                                .long_term_idx
                                .is_some_and(|idx| max.is_none_or(|m| idx > m));
                            if over {
                                self.remove_at(pool, i);
                            } else {
                                i += 1;
                            }
                        }
                    }
                    MmcoOp::ClearAll => {
                        while !self.refs.is_empty() {
                            self.remove_at(pool, 0);
                        }
                        self.max_long_term_idx = None;
                        outcome.mmco5 = true;
                    }
                    MmcoOp::MarkCurrentLong { long_term_frame_idx } => {
                        if let Some(i) = self.find_long(long_term_frame_idx) {
                            self.remove_at(pool, i);
                        }
                        current_long = Some(long_term_frame_idx);
                    }
                }
            }
        } else {
            self.sliding_window(pool, frame_num);
        }

        let stored_frame_num = if outcome.mmco5 { 0 } else { frame_num };
        pool.retain(handle);
        self.refs.push(RefPicture {
            handle: Some(handle),
            frame_num: stored_frame_num,
            long_term_idx: current_long,
        });
        self.prev_ref_frame_num = Some(stored_frame_num);
        self.enforce_capacity(pool, stored_frame_num);
        debug!(
            "H264: 参考标记完成, frame_num={}, refs={}, long={:?}, mmco5={}",
            stored_frame_num,
            self.refs.len(),
            current_long,
            outcome.mmco5
        );
        outcome
    }

    fn find_short(&self, pic_num: i32, cur_frame_num: u32) -> Option<usize> {
        self.refs
            .iter()
            .position(|r| r.is_short_term() && self.frame_num_wrap(r.frame_num, cur_frame_num) == pic_num)
    }

    fn find_long(&self, long_term_idx: u32) -> Option<usize> {
        self.refs.iter().position(|r| r.long_term_idx == Some(long_term_idx))
    }

    fn remove_at(&mut self, pool: &mut FramePool, index: usize) {
        let removed = self.refs.remove(index);
        if let Some(h) = removed.handle {
            pool.release(h);
        }
    }

    /// 滑动窗口 (8.2.5.3): 参考集已满时移除 FrameNumWrap 最小的短期参考
    fn sliding_window(&mut self, pool: &mut FramePool, cur_frame_num: u32) {
        if self.refs.len() >= self.max_num_ref_frames {
            self.remove_oldest_short(pool, cur_frame_num);
        }
    }

    fn enforce_capacity(&mut self, pool: &mut FramePool, cur_frame_num: u32) {
        while self.refs.len() > self.max_num_ref_frames {
            if !self.remove_oldest_short(pool, cur_frame_num) {
                break;
            }
        }
    }

    /// 滑动窗口只移除短期参考, 没有短期参考时返回 false
    fn remove_oldest_short(&mut self, pool: &mut FramePool, cur_frame_num: u32) -> bool {
        let oldest = self
            .refs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_short_term())
            .min_by_key(|(_, r)| self.frame_num_wrap(r.frame_num, cur_frame_num))
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                self.remove_at(pool, i);
                true
            }
            None => {
                warn!(
                    "H264: 参考集已满且全部为长期参考, 跳过滑动窗口, refs={}, max={}",
                    self.refs.len(),
                    self.max_num_ref_frames
                );
                false
            }
        }
    }

    // ============================================================
    // frame_num 间隙
    // ============================================================

    /// 当前 frame_num 是否与上一参考图像不连续
    pub(super) fn has_gap(&self, frame_num: u32, is_idr: bool) -> bool {
        if is_idr {
            return false;
        }
        let Some(prev) = self.prev_ref_frame_num else {
            return false;
        };
        frame_num != prev && frame_num != (prev + 1) % self.max_frame_num
    }

    /// 为间隙中的每个 frame_num 插入非存在的短期参考帧
    ///
    /// 只有最后 `max_num_ref_frames` 个会留在滑动窗口内, 更早的直接跳过.
    pub(super) fn fill_frame_num_gap(&mut self, pool: &mut FramePool, frame_num: u32) -> usize {
        let Some(prev) = self.prev_ref_frame_num else {
            return 0;
        };
        let max = self.max_frame_num;
        let missing = (frame_num + max - prev - 1) % max;
        let kept = (missing as usize).min(self.max_num_ref_frames);
        let first = (frame_num + max - kept as u32) % max;
        for k in 0..kept as u32 {
            let unused = (first + k) % max;
            self.sliding_window(pool, unused);
            self.refs.push(RefPicture {
                handle: None,
                frame_num: unused,
                long_term_idx: None,
            });
            self.enforce_capacity(pool, unused);
            self.prev_ref_frame_num = Some(unused);
        }
        warn!(
            "H264: frame_num 间隙, prev={}, cur={}, missing={}, inserted={}",
            prev, frame_num, missing, kept
        );
        kept
    }
}

fn to_entry(r: &RefPicture) -> RefListEntry {
    RefListEntry {
        handle: r.handle,
        frame_num: r.frame_num,
        long_term: r.long_term_idx.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(max_refs: u32) -> (Dpb, FramePool) {
        let mut dpb = Dpb::default();
        dpb.configure(max_refs, 16);
        (dpb, FramePool::new(8))
    }

    /// 解码一幅参考图像并按给定标记加入参考集
    fn decode_ref(dpb: &mut Dpb, pool: &mut FramePool, frame_num: u32, idr: bool, marking: DecRefPicMarking) -> PicHandle {
        let (h, pic) = pool.acquire(1, 1).expect("分配应成功");
        pool.restore(h, pic);
        dpb.mark_current(pool, h, frame_num, idr, &marking);
        pool.release(h);
        h
    }

    fn list_frame_nums(list: &[Option<RefListEntry>]) -> Vec<Option<u32>> {
        list.iter().map(|e| e.map(|e| e.frame_num)).collect()
    }

    #[test]
    fn test_sliding_window_drops_oldest_short_term() {
        let (mut dpb, mut pool) = setup(2);
        decode_ref(&mut dpb, &mut pool, 0, true, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 1, false, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 2, false, DecRefPicMarking::default());
        let list = dpb.build_list_p(3, 2, &[]);
        assert_eq!(list_frame_nums(&list), vec![Some(2), Some(1)]);
        assert_eq!(pool.in_use(), 2, "被滑出的帧应回到缓冲池");
    }

    #[test]
    fn test_initial_list_orders_by_descending_pic_num_with_wrap() {
        let (mut dpb, mut pool) = setup(4);
        decode_ref(&mut dpb, &mut pool, 14, true, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 15, false, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 0, false, DecRefPicMarking::default());
        let list = dpb.build_list_p(1, 3, &[]);
        assert_eq!(list_frame_nums(&list), vec![Some(0), Some(15), Some(14)], "回绕后的 frame_num 排在后面");
        let padded = dpb.build_list_p(1, 5, &[]);
        assert_eq!(padded[4], None, "超出可用参考的项填充为空");
    }

    #[test]
    fn test_list_modification_moves_picture_to_front() {
        let (mut dpb, mut pool) = setup(4);
        for n in 0..3 {
            decode_ref(&mut dpb, &mut pool, n, n == 0, DecRefPicMarking::default());
        }
        // CurrPicNum=3, abs_diff=3 → picNum 0
        let mods = [RefPicListMod::ShortTermSub { abs_diff_pic_num_minus1: 2 }];
        let list = dpb.build_list_p(3, 3, &mods);
        assert_eq!(list_frame_nums(&list), vec![Some(0), Some(2), Some(1)]);
    }

    #[test]
    fn test_mmco_convert_and_forget() {
        let (mut dpb, mut pool) = setup(4);
        decode_ref(&mut dpb, &mut pool, 0, true, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 1, false, DecRefPicMarking::default());
        let marking = DecRefPicMarking {
            adaptive: true,
            ops: vec![
                MmcoOp::TrimLong { max_long_term_frame_idx_plus1: 2 },
                MmcoOp::ConvertShortToLong {
                    difference_of_pic_nums_minus1: 1,
                    long_term_frame_idx: 1,
                },
                MmcoOp::ForgetShort { difference_of_pic_nums_minus1: 0 },
            ],
            ..Default::default()
        };
        decode_ref(&mut dpb, &mut pool, 2, false, marking);
        // frame 0 → 长期 1, frame 1 被移除, 当前帧 2 为短期
        let list = dpb.build_list_p(3, 2, &[]);
        assert_eq!(list_frame_nums(&list), vec![Some(2), Some(0)]);
        assert!(list[1].is_some_and(|e| e.long_term));
    }

    #[test]
    fn test_mmco5_clears_and_resets_frame_num() {
        let (mut dpb, mut pool) = setup(4);
        decode_ref(&mut dpb, &mut pool, 0, true, DecRefPicMarking::default());
        decode_ref(&mut dpb, &mut pool, 1, false, DecRefPicMarking::default());
        let marking = DecRefPicMarking {
            adaptive: true,
            ops: vec![MmcoOp::ClearAll],
            ..Default::default()
        };
        decode_ref(&mut dpb, &mut pool, 2, false, marking);
        assert_eq!(dpb.len(), 1);
        assert_eq!(dpb.refs()[0].frame_num, 0);
        assert_eq!(dpb.prev_ref_frame_num(), Some(0));
        assert!(!dpb.has_gap(1, false));
    }

    #[test]
    fn test_idr_long_term_reference_flag() {
        let (mut dpb, mut pool) = setup(2);
        let marking = DecRefPicMarking {
            long_term_reference_flag: true,
            ..Default::default()
        };
        decode_ref(&mut dpb, &mut pool, 0, true, marking);
        assert_eq!(dpb.refs()[0].long_term_idx, Some(0));
    }

    #[test]
    fn test_sliding_window_keeps_long_term_references() {
        let (mut dpb, mut pool) = setup(2);
        let idr_long = DecRefPicMarking {
            long_term_reference_flag: true,
            ..Default::default()
        };
        decode_ref(&mut dpb, &mut pool, 0, true, idr_long);
        let mark_long = DecRefPicMarking {
            adaptive: true,
            ops: vec![
                MmcoOp::TrimLong { max_long_term_frame_idx_plus1: 2 },
                MmcoOp::MarkCurrentLong { long_term_frame_idx: 1 },
            ],
            ..Default::default()
        };
        decode_ref(&mut dpb, &mut pool, 1, false, mark_long);
        assert_eq!(dpb.len(), 2);

        // 参考集已被长期参考占满, 滑动窗口不得移除它们
        decode_ref(&mut dpb, &mut pool, 2, false, DecRefPicMarking::default());
        assert_eq!(dpb.len(), 2);
        let mut long_idx: Vec<_> = dpb.refs().iter().map(|r| r.long_term_idx).collect();
        long_idx.sort();
        assert_eq!(long_idx, vec![Some(0), Some(1)]);
        assert_eq!(pool.in_use(), 2, "两个长期参考仍持有缓冲");
    }

    #[test]
    fn test_frame_num_gap_inserts_non_existing_frames() {
        let (mut dpb, mut pool) = setup(2);
        decode_ref(&mut dpb, &mut pool, 0, true, DecRefPicMarking::default());
        assert!(dpb.has_gap(4, false));
        assert!(!dpb.has_gap(1, false));
        let inserted = dpb.fill_frame_num_gap(&mut pool, 4);
        assert_eq!(inserted, 2, "只保留滑动窗口能容纳的帧");
        let list = dpb.build_list_p(4, 2, &[]);
        assert_eq!(list_frame_nums(&list), vec![Some(3), Some(2)]);
        assert!(list.iter().all(|e| e.is_some_and(|e| e.handle.is_none())));
        assert_eq!(pool.in_use(), 0, "IDR 帧已被滑出");
    }
}
