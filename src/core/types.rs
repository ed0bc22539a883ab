use serde::{Deserialize, Serialize};

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [StreamType::Video, StreamType::Audio, StreamType::Subtitle];

    pub fn index(self) -> usize {
        match self {
            StreamType::Video => 0,
            StreamType::Audio => 1,
            StreamType::Subtitle => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Subtitle => "sub",
        }
    }
}

/// 用户可见的轨道编号（每种流类型内部从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

/// 一条可选择的流
///
/// 底层流由 demuxer 持有，这里只记录引用信息
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub stream_type: StreamType,
    /// demuxer 内部的流编号
    pub demuxer_id: usize,
    /// 外部文件轨道所在的数据源索引；None 表示来自主数据源
    pub external_source: Option<usize>,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub default_track: bool,
    pub attached_picture: bool,
    /// 视频帧率（仅视频轨道）
    pub fps: Option<f64>,
    /// 解码后的音频格式（仅音频轨道，容器能提供时）
    pub audio_format: Option<AudioFormat>,
}

impl Track {
    pub fn new(id: u32, stream_type: StreamType, demuxer_id: usize) -> Self {
        Self {
            id: TrackId(id),
            stream_type,
            demuxer_id,
            external_source: None,
            lang: None,
            title: None,
            default_track: false,
            attached_picture: false,
            fps: None,
            audio_format: None,
        }
    }

    pub fn is_external(&self) -> bool {
        self.external_source.is_some()
    }
}

/// 轨道选择方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSelection {
    /// 按偏好自动选择
    #[default]
    Auto,
    /// 禁用该类型的流
    Off,
    /// 指定轨道编号
    Id(u32),
}

/// 章节
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub start: f64,
    pub name: Option<String>,
}

/// Seek 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekKind {
    #[default]
    None,
    Relative,
    Absolute,
    /// 按总时长比例（0.0 - 1.0）
    Factor,
}

/// Seek 精度（三态），顺序可比较：Keyframe < Default < Exact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekPrecision {
    /// 只跳到关键帧，禁止精确 seek
    Keyframe,
    /// 由选项决定
    #[default]
    Default,
    /// 强制精确 seek
    Exact,
}

/// 待执行的 seek 请求（同一时间最多一个）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeekRequest {
    pub kind: SeekKind,
    pub amount: f64,
    pub precision: SeekPrecision,
    /// -1 向后，0 不限，1 向前
    pub direction: i8,
}

impl SeekRequest {
    pub fn absolute(amount: f64) -> Self {
        Self {
            kind: SeekKind::Absolute,
            amount,
            ..Default::default()
        }
    }

    pub fn relative(amount: f64) -> Self {
        Self {
            kind: SeekKind::Relative,
            amount,
            ..Default::default()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.kind != SeekKind::None
    }
}

/// 当前文件的停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    #[default]
    KeepPlaying,
    AtEndOfFile,
    NextEntry,
    CurrentEntry,
    Stop,
    Restart,
    Quit,
}

impl StopReason {
    pub fn is_stopping(&self) -> bool {
        *self != StopReason::KeepPlaying
    }
}

/// 丢帧策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameDropMode {
    #[default]
    None,
    /// 解码但不显示
    SkipDisplay,
    /// 让解码器跳过非参考帧
    SkipDecode,
}

/// 视频时间戳关联方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PtsAssocMode {
    /// 使用解码器内部重排后的时间戳
    CodecReordered,
    /// 使用外部排序后的 demuxer 时间戳
    Sorted,
}

impl PtsAssocMode {
    pub fn other(self) -> Self {
        match self {
            PtsAssocMode::CodecReordered => PtsAssocMode::Sorted,
            PtsAssocMode::Sorted => PtsAssocMode::CodecReordered,
        }
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// 音频输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// 一个完整采样帧（所有声道）的字节数
    pub fn unit_size(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> f64 {
        (self.sample_rate as usize * self.unit_size()) as f64
    }

    /// 静音填充字节（无符号格式以 0x80 为零点）
    pub fn silence_byte(&self) -> u8 {
        match self.sample_format {
            SampleFormat::U8 => 0x80,
            _ => 0,
        }
    }
}

/// 视频帧数据
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 最终确定的显示时间戳（秒），由视频泵写入
    pub pts: Option<f64>,
    /// 解码器内部重排后的时间戳（秒）
    pub reordered_pts: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// 音频帧数据（已解码的交错 PCM 字节）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 解码器报告的时间戳（秒），可能缺失
    pub pts: Option<f64>,
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// 用户命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum PlayerCommand {
    Seek {
        kind: SeekKind,
        amount: f64,
        #[serde(default)]
        precision: SeekPrecision,
    },
    SetChapter { chapter: usize },
    AddChapter { step: i32 },
    SetPause { paused: bool },
    CyclePause,
    FrameStep,
    SwitchTrack {
        stream: StreamType,
        track: Option<u32>,
    },
    CycleTrack { stream: StreamType },
    AddAudioDelay { seconds: f64 },
    SetSpeed { speed: f64 },
    PlaylistNext,
    PlaylistPrev,
    Reload,
    Stop,
    Quit,
}

impl PlayerCommand {
    pub fn is_seek(&self) -> bool {
        matches!(self, PlayerCommand::Seek { .. })
    }
}

/// 状态显示用的诊断信息（不参与控制）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub stop_reason: StopReason,
    pub paused: bool,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub av_difference: Option<f64>,
    pub total_avsync_change: f64,
    pub drop_frame_count: u64,
}
