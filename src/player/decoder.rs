use crate::core::{AudioFormat, AudioFrame, FrameDropMode, Result, VideoFrame};
use crate::player::MediaPacket;

/// 音频解码器
pub trait AudioDecoder {
    /// 解码一个包；需要更多数据时返回 Ok(None)
    ///
    /// 输出帧的 pts 是输入包里最近一个已知时间戳
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<AudioFrame>>;

    /// 当前输出格式
    fn format(&self) -> AudioFormat;

    /// 解码器和滤镜内部还没有输出的字节数
    fn buffered_bytes(&self) -> usize {
        0
    }

    /// seek 后清空内部状态
    fn reset(&mut self);
}

/// 视频解码器
pub trait VideoDecoder {
    /// 解码一个包；`packet` 为 None 表示流已结束，需要冲刷内部缓冲
    ///
    /// `drop` 为 SkipDecode 时解码器可以直接跳过非参考帧
    fn decode(&mut self, packet: Option<&MediaPacket>, drop: FrameDropMode)
        -> Result<Option<VideoFrame>>;

    fn reset(&mut self);

    /// 获取解码器信息
    fn info(&self) -> String;
}

/// 字幕解码器（渲染由外部负责）
pub trait SubtitleDecoder {
    fn decode(&mut self, packet: &MediaPacket);

    /// 按显示时间更新当前字幕
    fn update(&mut self, pts: f64);

    fn reset(&mut self);
}
