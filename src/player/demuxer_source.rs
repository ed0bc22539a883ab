use crate::core::{Chapter, Result, StreamType, Track};

/// 媒体包
///
/// 长度为 0 的包只用来占位（某些容器要求固定时间间隔出包），不对应任何帧
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPacket {
    pub stream: StreamType,
    /// 显示时间戳（秒）
    pub pts: Option<f64>,
    pub data: Vec<u8>,
}

impl MediaPacket {
    pub fn new(stream: StreamType, pts: Option<f64>, data: Vec<u8>) -> Self {
        Self { stream, pts, data }
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.is_empty()
    }
}

/// 底层 seek 的方向/方式提示
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// 目标是绝对时间；否则是相对当前位置的偏移
    pub absolute: bool,
    /// 目标是 0.0 - 1.0 的比例
    pub factor: bool,
    /// 落点必须不晚于目标
    pub backward: bool,
    pub forward: bool,
    /// 需要预读目标之前的字幕包
    pub subpreroll: bool,
}

/// Demuxer 数据源抽象接口
///
/// 播放循环只通过这个 trait 读包和 seek。不同的媒体源（本地文件、
/// 内存流、测试用的合成流）各自实现
pub trait DemuxerSource {
    /// 跳转；失败时（例如不可 seek 的流）位置保持不变
    fn seek(&mut self, target: f64, flags: SeekFlags) -> Result<()>;

    /// 读取指定类型当前选中流的下一个包，流结束返回 None
    fn next_packet(&mut self, stream: StreamType) -> Option<MediaPacket>;

    /// 总时长（秒），未知返回 None
    fn stream_length(&self) -> Option<f64>;

    fn start_time(&self) -> f64 {
        0.0
    }

    /// 落点是否足够精确，可以做逐帧精确 seek
    fn accurate_seek(&self) -> bool;

    /// 时间戳可能任意重置（无法把比例换算成时间）
    fn ts_resets_possible(&self) -> bool {
        false
    }

    /// 时间戳是显示时间戳而不是解码时间戳
    fn timestamps_are_pts(&self) -> bool {
        true
    }

    /// 指定类型的流是否已读完
    fn is_eof(&self, stream: StreamType) -> bool;

    /// 可选择的流；编号由播放上下文重新分配
    fn tracks(&self) -> Vec<Track>;

    fn chapters(&self) -> Vec<Chapter> {
        Vec::new()
    }

    /// 选择某类型要输出的流（demuxer 内部编号），None 表示不输出
    fn select_stream(&mut self, stream: StreamType, demuxer_id: Option<usize>);

    /// 最近读出的包的时间戳
    fn current_pts(&self) -> Option<f64>;

    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
