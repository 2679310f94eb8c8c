//! 宏块邻居信息.
//!
//! 每幅图像维护一张 `MbGrid`, 记录已解码宏块在语法层与运动层的结果,
//! 供后续宏块的上下文推导、运动矢量预测、帧内预测与去块滤波使用.
//! 当前宏块在解析期间的信息放在 `MbRecord::info` 中, 解码完成后写回网格.

// ============================================================
// 宏块类别
// ============================================================

/// 宏块类别 (邻居推导只关心这一层)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum MbKind {
    #[default]
    I4x4,
    I16x16,
    IPcm,
    PInter,
    PSkip,
}

impl MbKind {
    pub(super) fn is_intra(self) -> bool {
        matches!(self, Self::I4x4 | Self::I16x16 | Self::IPcm)
    }
}

// ============================================================
// 单个宏块的邻居信息
// ============================================================

/// 宏块信息, 4x4 粒度的数组按宏块内光栅顺序 (y4 * 4 + x4) 存放
#[derive(Debug, Clone, PartialEq)]
pub(super) struct MbInfo {
    /// 所属 slice 序号, -1 表示尚未解码
    pub slice_id: i32,
    pub kind: MbKind,
    pub qp: i32,
    /// 低 4 位为亮度 8x8 的 CBP, 第 4..5 位为色度 CBP
    pub cbp: u8,
    pub chroma_pred_mode: u8,
    pub intra4x4_modes: [u8; 16],
    pub total_coeff: [u8; 16],
    pub chroma_total_coeff: [[u8; 4]; 2],
    /// bit0: 亮度 DC, bit1: Cb DC, bit2: Cr DC
    pub coded_dc: u8,
    pub mv: [[i16; 2]; 16],
    pub mvd: [[i16; 2]; 16],
    /// -1 表示无参考 (帧内)
    pub ref_idx: [i8; 16],
    /// 每个 8x8 分区引用的参考图像标识, -1 表示无
    pub ref_pic: [i64; 4],
    /// 错误隐藏填充的宏块
    pub concealed: bool,
}

impl Default for MbInfo {
    fn default() -> Self {
        Self {
            slice_id: -1,
            kind: MbKind::default(),
            qp: 0,
            cbp: 0,
            chroma_pred_mode: 0,
            intra4x4_modes: [2; 16],
            total_coeff: [0; 16],
            chroma_total_coeff: [[0; 4]; 2],
            coded_dc: 0,
            mv: [[0; 2]; 16],
            mvd: [[0; 2]; 16],
            ref_idx: [-1; 16],
            ref_pic: [-1; 4],
            concealed: false,
        }
    }
}

impl MbInfo {
    pub(super) fn cbp_luma(&self) -> u8 {
        self.cbp & 0x0f
    }

    pub(super) fn cbp_chroma(&self) -> u8 {
        (self.cbp >> 4) & 0x03
    }

    pub(super) fn is_decoded(&self) -> bool {
        self.slice_id >= 0
    }

    /// 在 4x4 区域 `[x4, x4 + w4) x [y4, y4 + h4)` 上写入运动信息
    pub(super) fn fill_motion(&mut self, x4: usize, y4: usize, w4: usize, h4: usize, ref_idx: i8, mv: [i16; 2]) {
        for y in y4..(y4 + h4).min(4) {
            for x in x4..(x4 + w4).min(4) {
                self.ref_idx[y * 4 + x] = ref_idx;
                self.mv[y * 4 + x] = mv;
            }
        }
    }

    pub(super) fn fill_ref_idx(&mut self, x4: usize, y4: usize, w4: usize, h4: usize, ref_idx: i8) {
        for y in y4..(y4 + h4).min(4) {
            for x in x4..(x4 + w4).min(4) {
                self.ref_idx[y * 4 + x] = ref_idx;
            }
        }
    }

    pub(super) fn fill_mvd(&mut self, x4: usize, y4: usize, w4: usize, h4: usize, mvd: [i16; 2]) {
        for y in y4..(y4 + h4).min(4) {
            for x in x4..(x4 + w4).min(4) {
                self.mvd[y * 4 + x] = mvd;
            }
        }
    }

    /// I_PCM 宏块: 所有块按 16 个系数计
    pub(super) fn mark_pcm(&mut self) {
        self.kind = MbKind::IPcm;
        self.cbp = 0x2f;
        self.total_coeff = [16; 16];
        self.chroma_total_coeff = [[16; 4]; 2];
        self.coded_dc = 0x07;
        self.qp = 0;
    }
}

// ============================================================
// 图像级宏块网格
// ============================================================

/// 一幅图像的宏块信息表
#[derive(Debug, Clone, Default)]
pub(super) struct MbGrid {
    pub mb_width: usize,
    pub mb_height: usize,
    pub infos: Vec<MbInfo>,
}

impl MbGrid {
    pub(super) fn new(mb_width: usize, mb_height: usize) -> Self {
        Self {
            mb_width,
            mb_height,
            infos: vec![MbInfo::default(); mb_width * mb_height],
        }
    }

    pub(super) fn mb_count(&self) -> usize {
        self.infos.len()
    }

    pub(super) fn undecoded_count(&self) -> usize {
        self.infos.iter().filter(|info| !info.is_decoded()).count()
    }

    /// 相对 `cur` 偏移 (dx, dy) 个宏块的邻居, 仅在同一 slice 且已解码时可用
    pub(super) fn neighbor(&self, cur: usize, slice_id: i32, dx: i32, dy: i32) -> Option<usize> {
        if self.mb_width == 0 {
            return None;
        }
        let mx = (cur % self.mb_width) as i32 + dx;
        let my = (cur / self.mb_width) as i32 + dy;
        if mx < 0 || my < 0 || mx >= self.mb_width as i32 || my >= self.mb_height as i32 {
            return None;
        }
        let addr = my as usize * self.mb_width + mx as usize;
        if addr >= cur {
            return None;
        }
        let info = self.infos.get(addr)?;
        (info.slice_id == slice_id && info.is_decoded()).then_some(addr)
    }
}

// ============================================================
// 当前宏块位置
// ============================================================

/// 当前宏块在网格中的位置, 负责把 4x4 坐标映射到邻居宏块
#[derive(Clone, Copy)]
pub(super) struct MbPos<'a> {
    pub grid: &'a MbGrid,
    pub addr: usize,
    pub slice_id: i32,
}

impl<'a> MbPos<'a> {
    pub(super) fn new(grid: &'a MbGrid, addr: usize, slice_id: i32) -> Self {
        Self { grid, addr, slice_id }
    }

    pub(super) fn mb_x(&self) -> usize {
        self.addr % self.grid.mb_width.max(1)
    }

    pub(super) fn mb_y(&self) -> usize {
        self.addr / self.grid.mb_width.max(1)
    }

    /// 相邻宏块: (-1, 0) 为 A, (0, -1) 为 B, (1, -1) 为 C, (-1, -1) 为 D
    pub(super) fn mb(&self, dx: i32, dy: i32) -> Option<&'a MbInfo> {
        let addr = self.grid.neighbor(self.addr, self.slice_id, dx, dy)?;
        self.grid.infos.get(addr)
    }

    pub(super) fn left(&self) -> Option<&'a MbInfo> {
        self.mb(-1, 0)
    }

    pub(super) fn top(&self) -> Option<&'a MbInfo> {
        self.mb(0, -1)
    }

    /// 定位宏块内坐标 (x4, y4) 处的 4x4 块, 坐标允许为 -1 或 4
    ///
    /// 返回所属宏块信息与其内部光栅索引, 当前宏块内的位置取 `cur`.
    pub(super) fn locate<'b>(&self, cur: &'b MbInfo, x4: i32, y4: i32) -> Option<(&'b MbInfo, usize)>
    where
        'a: 'b,
    {
        let dx = if x4 < 0 {
            -1
        } else if x4 >= 4 {
            1
        } else {
            0
        };
        let dy = if y4 < 0 { -1 } else if y4 >= 4 { 1 } else { 0 };
        let raster = (y4.rem_euclid(4) * 4 + x4.rem_euclid(4)) as usize;
        if dx == 0 && dy == 0 {
            return Some((cur, raster));
        }
        if dy > 0 || (dy == 0 && dx > 0) {
            return None;
        }
        self.mb(dx, dy).map(|info| (info, raster))
    }

    /// 色度 4x4 块定位, 坐标单位为色度 4x4 (0..2)
    pub(super) fn locate_chroma<'b>(&self, cur: &'b MbInfo, x2: i32, y2: i32) -> Option<(&'b MbInfo, usize)>
    where
        'a: 'b,
    {
        let dx = if x2 < 0 { -1 } else { 0 };
        let dy = if y2 < 0 { -1 } else { 0 };
        let idx = (y2.rem_euclid(2) * 2 + x2.rem_euclid(2)) as usize;
        if dx == 0 && dy == 0 {
            return Some((cur, idx));
        }
        self.mb(dx, dy).map(|info| (info, idx))
    }
}
