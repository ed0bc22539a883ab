//! 视频帧时间戳的确定
//!
//! 有 B 帧时解码输出顺序和输入顺序不同，帧的时间戳有两种来源：
//! 解码器内部重排后的时间戳，以及把 demuxer 时间戳排序后按输出顺序取出的值。
//! 两种来源各自统计出错次数，明显更差的一方会被切换掉。

use crate::core::PtsAssocMode;
use log::debug;

/// 排序队列最多缓存的时间戳个数
pub const MAX_BUFFERED_PTS: usize = 32;

/// 一方的出错次数达到另一方的这个倍数（再加 2）就切换
const SWITCH_RATIO: f64 = 1.5;

/// 按降序保存的 demuxer 时间戳，每个解码输出帧取走最小的一个
#[derive(Debug, Clone, Default)]
pub struct SortedPts {
    values: Vec<f64>,
}

impl SortedPts {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个时间戳；队列已满时丢弃并返回 false
    pub fn push(&mut self, pts: f64) -> bool {
        if self.values.len() >= MAX_BUFFERED_PTS {
            return false;
        }
        let idx = self
            .values
            .iter()
            .position(|&v| v < pts)
            .unwrap_or(self.values.len());
        self.values.insert(idx, pts);
        true
    }

    pub fn pop_smallest(&mut self) -> Option<f64> {
        self.values.pop()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// 时间戳关联方式的状态：当前方式和两种来源各自的出错次数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PtsAssocState {
    /// None 表示还没有决定
    pub mode: Option<PtsAssocMode>,
    pub reordered_problems: u32,
    pub sorted_problems: u32,
}

impl PtsAssocState {
    fn problems(&self, mode: PtsAssocMode) -> u32 {
        match mode {
            PtsAssocMode::CodecReordered => self.reordered_problems,
            PtsAssocMode::Sorted => self.sorted_problems,
        }
    }
}

/// 决定（或切换）时间戳关联方式
///
/// - 用户指定时总是使用指定值
/// - 第一次决定时，demuxer 给的是显示时间戳且解码器报告了重排时间戳就用重排，否则用排序
/// - 之后当前方式的出错次数 >= 另一方 * 1.5 + 2 时切换
pub fn maybe_switch_mode(
    state: PtsAssocState,
    user_mode: Option<PtsAssocMode>,
    timestamps_are_pts: bool,
    have_reordered_pts: bool,
) -> PtsAssocState {
    let mut next = state;
    if let Some(mode) = user_mode {
        next.mode = Some(mode);
        return next;
    }
    match state.mode {
        None => {
            next.mode = Some(if timestamps_are_pts && have_reordered_pts {
                PtsAssocMode::CodecReordered
            } else {
                PtsAssocMode::Sorted
            });
        }
        Some(mode) => {
            let current = state.problems(mode) as f64;
            let other = state.problems(mode.other()) as f64;
            if current >= other * SWITCH_RATIO + 2.0 {
                debug!("🔀 切换时间戳关联方式: {:?} -> {:?}", mode, mode.other());
                next.mode = Some(mode.other());
            }
        }
    }
    next
}

/// 时间戳倒退的处理，返回修正后的 (pts, last_pts)
///
/// 倒退不超过 `threshold` 视为抖动，这一帧紧接上一帧显示；
/// 超过则视为时间戳重置，从这一帧重新计时
pub fn correct_decreasing_pts(last_pts: f64, pts: f64, threshold: f64) -> (f64, f64) {
    if last_pts <= pts {
        return (pts, last_pts);
    }
    if last_pts - pts > threshold {
        (pts, pts)
    } else {
        (last_pts, last_pts)
    }
}

/// 一条视频链路的时间戳跟踪
#[derive(Debug, Clone, Default)]
pub struct FramePts {
    queue: SortedPts,
    pub(crate) assoc: PtsAssocState,
    sorted_pts: Option<f64>,
    reordered_pts: Option<f64>,
}

impl FramePts {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录送进解码器的包的时间戳
    pub fn push_packet_pts(&mut self, pts: f64) {
        if !self.queue.push(pts) {
            log::error!("❌ 缓存的视频时间戳过多，丢弃 {:.3}", pts);
        }
    }

    /// 解码器输出了一帧：更新两种来源的时间戳和出错统计
    pub fn on_frame(&mut self, reordered_pts: Option<f64>) {
        let sorted = self.queue.pop_smallest();
        if sorted.is_none() {
            debug!("⚠️  没有可用于该帧的 demuxer 时间戳");
        }
        if is_problem(self.sorted_pts, sorted) {
            self.assoc.sorted_problems += 1;
        }
        self.sorted_pts = sorted;
        if is_problem(self.reordered_pts, reordered_pts) {
            self.assoc.reordered_problems += 1;
        }
        self.reordered_pts = reordered_pts;
    }

    /// 按当前关联方式给出最近一帧的时间戳
    pub fn determine(&mut self, user_mode: Option<PtsAssocMode>, timestamps_are_pts: bool) -> Option<f64> {
        self.assoc = maybe_switch_mode(
            self.assoc,
            user_mode,
            timestamps_are_pts,
            self.reordered_pts.is_some(),
        );
        match self.assoc.mode {
            Some(PtsAssocMode::CodecReordered) => self.reordered_pts,
            _ => self.sorted_pts,
        }
    }

    pub fn mode(&self) -> Option<PtsAssocMode> {
        self.assoc.mode
    }

    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// seek 后丢弃缓存的时间戳；出错统计和已选方式保留
    pub fn reset(&mut self) {
        self.queue.clear();
        self.sorted_pts = None;
        self.reordered_pts = None;
    }
}

fn is_problem(prev: Option<f64>, next: Option<f64>) -> bool {
    match (prev, next) {
        (_, None) => true,
        (Some(p), Some(n)) => n <= p,
        (None, Some(_)) => false,
    }
}
