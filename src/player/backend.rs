use crate::core::{AudioFormat, Result, Track};
use crate::player::{AudioDecoder, AudioOutput, SubtitleDecoder, VideoDecoder, VideoOutput};

/// 解码器和输出设备的工厂
///
/// 播放上下文在选轨、切轨、格式变化时通过它重建各条链路
pub trait MediaBackend {
    fn open_audio_decoder(&mut self, track: &Track) -> Result<Box<dyn AudioDecoder>>;

    fn open_video_decoder(&mut self, track: &Track) -> Result<Box<dyn VideoDecoder>>;

    fn open_subtitle_decoder(&mut self, track: &Track) -> Result<Box<dyn SubtitleDecoder>>;

    fn open_audio_output(&mut self, format: AudioFormat) -> Result<Box<dyn AudioOutput>>;

    fn open_video_output(&mut self) -> Result<Box<dyn VideoOutput>>;
}
