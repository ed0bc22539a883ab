use crate::core::{FrameDropMode, PtsAssocMode, Result, TrackSelection};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 区分时间戳抖动和真正跳变的阈值（秒），经验值
pub const DEFAULT_DECREASING_PTS_THRESHOLD: f64 = 0.5;

/// 循环至少每隔这么久醒来一次（秒），用于轮询没有事件通知的定时任务
pub const DEFAULT_WAKEUP_PERIOD: f64 = 0.5;

/// 精确 seek 的启用策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HrSeekMode {
    /// 只有请求显式要求精确时才启用
    Never,
    /// 绝对位置 seek 时启用
    #[default]
    Absolute,
    /// 总是启用
    Always,
}

/// 播放选项
///
/// 所有字段都有默认值，JSON 配置文件只需要写需要覆盖的部分
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// 播放速率（1.0 = 正常）
    pub playback_speed: f64,
    /// 音频落后时的丢帧策略
    pub frame_dropping: FrameDropMode,
    pub hr_seek: HrSeekMode,
    /// 精确 seek 时额外向前多 seek 的秒数
    pub hr_seek_demuxer_offset: f64,
    /// 每帧同步修正的上限（秒）；None 表示使用帧时长的 10%
    pub max_pts_correction: Option<f64>,
    pub correct_pts: bool,
    /// 起播/seek 后按视频位置对齐音频
    pub initial_audio_sync: bool,
    /// 最后 11ms 用忙等保证精度
    pub softsleep: bool,
    /// 平滑音频设备报告的延迟，0 表示关闭
    pub autosync: u32,
    /// 不做任何等待，尽快输出帧
    pub untimed: bool,
    pub gapless_audio: bool,
    /// 切换视频轨道时保留视频输出设备
    pub fixed_vo: bool,
    /// 播放结束后暂停而不是退出
    pub keep_open: bool,
    /// 每次迭代相对 seek 的步长（秒），0 表示关闭
    pub step_sec: f64,
    pub play_start: Option<f64>,
    pub play_end: Option<f64>,
    pub play_length: Option<f64>,
    /// 显示这么多帧后进入下一个文件
    pub max_frames: Option<i64>,
    /// 期望的音视频时间差（秒）
    pub audio_delay: f64,
    /// 用户强制的时间戳关联模式
    pub pts_assoc_mode: Option<PtsAssocMode>,
    pub decreasing_pts_threshold: f64,
    pub wakeup_period: f64,
    pub audio_lang: Vec<String>,
    pub sub_lang: Vec<String>,
    pub video_id: TrackSelection,
    pub audio_id: TrackSelection,
    pub sub_id: TrackSelection,
    /// 允许显示附加封面图作为视频轨道
    pub audio_display: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            playback_speed: 1.0,
            frame_dropping: FrameDropMode::None,
            hr_seek: HrSeekMode::Absolute,
            hr_seek_demuxer_offset: 0.0,
            max_pts_correction: None,
            correct_pts: true,
            initial_audio_sync: true,
            softsleep: false,
            autosync: 0,
            untimed: false,
            gapless_audio: false,
            fixed_vo: false,
            keep_open: false,
            step_sec: 0.0,
            play_start: None,
            play_end: None,
            play_length: None,
            max_frames: None,
            audio_delay: 0.0,
            pts_assoc_mode: None,
            decreasing_pts_threshold: DEFAULT_DECREASING_PTS_THRESHOLD,
            wakeup_period: DEFAULT_WAKEUP_PERIOD,
            audio_lang: Vec::new(),
            sub_lang: Vec::new(),
            video_id: TrackSelection::Auto,
            audio_id: TrackSelection::Auto,
            sub_id: TrackSelection::Auto,
            audio_display: true,
        }
    }
}

impl PlaybackOptions {
    /// 从 JSON 文件加载选项
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let opts = Self::from_json_str(&text)?;
        info!("📄 加载播放选项: {}", path.as_ref().display());
        Ok(opts)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut opts: PlaybackOptions = serde_json::from_str(text)?;
        opts.sanitize();
        Ok(opts)
    }

    /// 把明显无效的取值拉回可用范围
    pub fn sanitize(&mut self) {
        if !(self.playback_speed.is_finite() && self.playback_speed > 0.0) {
            self.playback_speed = 1.0;
        }
        if !(self.wakeup_period > 0.0) {
            self.wakeup_period = DEFAULT_WAKEUP_PERIOD;
        }
        if !(self.decreasing_pts_threshold >= 0.0) {
            self.decreasing_pts_threshold = DEFAULT_DECREASING_PTS_THRESHOLD;
        }
        if let Some(max) = self.max_pts_correction {
            if !(max >= 0.0) {
                self.max_pts_correction = None;
            }
        }
    }
}
