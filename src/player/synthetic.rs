//! 合成媒体源和模拟设备
//!
//! 不依赖任何编解码库，按给定的时间戳生成包；音频设备按时间源模拟播放进度。
//! 既用于单元测试，也用于命令行演示。

use crate::core::{
    AudioFormat, AudioFrame, Chapter, FrameDropMode, PixelFormat, PlayerCommand, PlayerError,
    Result, StreamType, TimeSource, Track, TrackId, VideoFrame,
};
use crate::player::{
    AudioDecoder, AudioOutput, CommandSource, DemuxerSource, MediaBackend, MediaPacket, SeekFlags,
    SubtitleDecoder, VideoDecoder, VideoOutput,
};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// 判断时间是否到达时允许的误差
const TIME_EPSILON: f64 = 1e-9;

/// 合成视频帧的尺寸
const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 36;

struct SyntheticStream {
    track: Track,
    packets: Vec<MediaPacket>,
    /// 一个包覆盖的时长，用于估算总时长
    packet_duration: f64,
    pos: usize,
    selected: bool,
}

impl SyntheticStream {
    fn new(track: Track, packets: Vec<MediaPacket>, packet_duration: f64) -> Self {
        Self {
            track,
            packets,
            packet_duration,
            pos: 0,
            selected: true,
        }
    }

    fn end_pts(&self) -> Option<f64> {
        self.packets
            .iter()
            .rev()
            .find_map(|p| p.pts)
            .map(|pts| pts + self.packet_duration)
    }

    /// 按 seek 方向定位到一个带时间戳的包
    fn locate(&mut self, target: f64, flags: SeekFlags) {
        let timed = || self.packets.iter().enumerate().filter_map(|(i, p)| p.pts.map(|t| (i, t)));
        let first_after = timed().find(|&(_, t)| t >= target - TIME_EPSILON).map(|(i, _)| i);
        let last_before = timed()
            .filter(|&(_, t)| t <= target + TIME_EPSILON)
            .last()
            .map(|(i, _)| i);
        self.pos = if flags.backward {
            last_before.unwrap_or(0)
        } else {
            first_after.unwrap_or(self.packets.len())
        };
    }
}

/// 合成 demuxer
///
/// 同一类型可以有多条流，按添加顺序编号；每种类型同时只读一条选中的流
pub struct SyntheticDemuxer {
    name: String,
    streams: Vec<SyntheticStream>,
    length: Option<f64>,
    seekable: bool,
    accurate: bool,
    chapters: Vec<Chapter>,
    current_pts: Option<f64>,
}

impl SyntheticDemuxer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            streams: Vec::new(),
            length: None,
            seekable: true,
            accurate: true,
            chapters: Vec::new(),
            current_pts: None,
        }
    }

    /// 追加一条流：轨道号是同类型内的序号，demuxer 流编号是总序号
    fn push_stream(&mut self, mut track: Track, packets: Vec<MediaPacket>, packet_duration: f64) {
        let same_type = self
            .streams
            .iter()
            .filter(|s| s.track.stream_type == track.stream_type)
            .count();
        track.id = TrackId(same_type as u32 + 1);
        track.demuxer_id = self.streams.len();
        self.streams.push(SyntheticStream::new(track, packets, packet_duration));
    }

    /// 最近添加的某类型的流
    fn last_stream_mut(&mut self, stream: StreamType) -> Option<&mut SyntheticStream> {
        self.streams.iter_mut().rev().find(|s| s.track.stream_type == stream)
    }

    /// 某类型当前选中的流
    fn active_stream(&self, stream: StreamType) -> Option<&SyntheticStream> {
        self.streams
            .iter()
            .find(|s| s.track.stream_type == stream && s.selected)
    }

    /// 固定帧率的视频流，第 i 帧的时间戳为 i / fps
    pub fn with_video(mut self, fps: f64, count: usize) -> Self {
        let pts: Vec<f64> = (0..count).map(|i| i as f64 / fps).collect();
        let mut track = Track::new(1, StreamType::Video, 0);
        track.fps = Some(fps);
        self.push_stream(track, video_packets(&pts), 1.0 / fps);
        self
    }

    /// 按给定时间戳生成视频包，不声明帧率
    pub fn with_video_pts(mut self, pts: &[f64]) -> Self {
        let track = Track::new(1, StreamType::Video, 0);
        self.push_stream(track, video_packets(pts), 0.0);
        self
    }

    /// 在最近添加的视频流的每个包后面插入一个空的占位包
    pub fn with_placeholder_packets(mut self) -> Self {
        if let Some(stream) = self.last_stream_mut(StreamType::Video) {
            let packets = std::mem::take(&mut stream.packets);
            for packet in packets {
                stream.packets.push(packet);
                stream.packets.push(MediaPacket::new(StreamType::Video, None, Vec::new()));
            }
        }
        self
    }

    pub fn with_audio(self, format: AudioFormat, duration: f64, packet_duration: f64) -> Self {
        self.with_audio_from(format, 0.0, duration, packet_duration)
    }

    /// 从 `start` 开始的 PCM 音频流
    pub fn with_audio_from(
        mut self,
        format: AudioFormat,
        start: f64,
        duration: f64,
        packet_duration: f64,
    ) -> Self {
        let unit = format.unit_size().max(1);
        let mut bytes = (packet_duration * format.bytes_per_second()).round() as usize;
        bytes -= bytes % unit;
        let count = (duration / packet_duration).round() as usize;
        let packets = (0..count)
            .map(|i| {
                MediaPacket::new(
                    StreamType::Audio,
                    Some(start + i as f64 * packet_duration),
                    vec![0x10; bytes],
                )
            })
            .collect();
        let mut track = Track::new(1, StreamType::Audio, 0);
        track.audio_format = Some(format);
        self.push_stream(track, packets, packet_duration);
        self
    }

    /// 最近添加的音频流时间戳按比例缩放（数据时长不变），模拟时间戳和采样率不一致的文件
    pub fn with_audio_pts_scale(mut self, scale: f64) -> Self {
        if let Some(stream) = self.last_stream_mut(StreamType::Audio) {
            for packet in stream.packets.iter_mut() {
                packet.pts = packet.pts.map(|p| p * scale);
            }
            stream.packet_duration *= scale;
        }
        self
    }

    /// 文本字幕流，包内容就是字幕文本
    pub fn with_subtitles(mut self, items: &[(f64, &str)]) -> Self {
        let packets = items
            .iter()
            .map(|&(pts, text)| {
                MediaPacket::new(StreamType::Subtitle, Some(pts), text.as_bytes().to_vec())
            })
            .collect();
        let track = Track::new(1, StreamType::Subtitle, 0);
        self.push_stream(track, packets, 0.0);
        self
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }

    pub fn accurate_seek(mut self, accurate: bool) -> Self {
        self.accurate = accurate;
        self
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }
}

fn video_packets(pts: &[f64]) -> Vec<MediaPacket> {
    pts.iter()
        .enumerate()
        .map(|(i, &p)| MediaPacket::new(StreamType::Video, Some(p), (i as u32).to_le_bytes().to_vec()))
        .collect()
}

impl DemuxerSource for SyntheticDemuxer {
    fn seek(&mut self, target: f64, flags: SeekFlags) -> Result<()> {
        if !self.seekable {
            return Err(PlayerError::NotSeekable);
        }
        let target = if flags.factor {
            let length = self
                .stream_length()
                .ok_or_else(|| PlayerError::SeekFailed("时长未知".to_string()))?;
            target * length
        } else if flags.absolute {
            target
        } else {
            self.current_pts.unwrap_or(0.0) + target
        };
        for stream in self.streams.iter_mut() {
            stream.locate(target, flags);
        }
        // 落点以选中的视频流为准
        self.current_pts = self
            .active_stream(StreamType::Video)
            .and_then(|s| s.packets.get(s.pos))
            .and_then(|p| p.pts)
            .or(Some(target.max(0.0)));
        debug!("🧪 {} seek {:.3}s -> {:?}", self.name, target, self.current_pts);
        Ok(())
    }

    fn next_packet(&mut self, stream: StreamType) -> Option<MediaPacket> {
        let s = self
            .streams
            .iter_mut()
            .find(|s| s.track.stream_type == stream && s.selected)?;
        let packet = s.packets.get(s.pos)?.clone();
        s.pos += 1;
        if packet.pts.is_some() {
            self.current_pts = packet.pts;
        }
        trace!("🧪 {} {} 包 {:?}", self.name, stream.as_str(), packet.pts);
        Some(packet)
    }

    fn stream_length(&self) -> Option<f64> {
        self.length.or_else(|| {
            self.streams
                .iter()
                .filter_map(|s| s.end_pts())
                .reduce(f64::max)
        })
    }

    fn accurate_seek(&self) -> bool {
        self.accurate
    }

    fn is_eof(&self, stream: StreamType) -> bool {
        self.active_stream(stream)
            .map_or(true, |s| s.pos >= s.packets.len())
    }

    fn tracks(&self) -> Vec<Track> {
        self.streams.iter().map(|s| s.track.clone()).collect()
    }

    fn chapters(&self) -> Vec<Chapter> {
        self.chapters.clone()
    }

    fn select_stream(&mut self, stream: StreamType, demuxer_id: Option<usize>) {
        for s in self.streams.iter_mut().filter(|s| s.track.stream_type == stream) {
            s.selected = demuxer_id == Some(s.track.demuxer_id);
        }
    }

    fn current_pts(&self) -> Option<f64> {
        self.current_pts
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn description(&self) -> String {
        format!("synthetic:{}", self.name)
    }
}

/// PCM 直通解码器
pub struct PcmAudioDecoder {
    format: AudioFormat,
    /// 前 N 个包不报告时间戳
    strip_pts: usize,
    decoded: usize,
}

impl AudioDecoder for PcmAudioDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<AudioFrame>> {
        self.decoded += 1;
        let pts = if self.decoded <= self.strip_pts { None } else { packet.pts };
        Ok(Some(AudioFrame {
            pts,
            format: self.format,
            data: packet.data.clone(),
        }))
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn reset(&mut self) {}
}

/// 视频直通解码器：每个包出一帧，重排时间戳等于包时间戳
pub struct PassthroughVideoDecoder {
    width: u32,
    height: u32,
}

impl VideoDecoder for PassthroughVideoDecoder {
    fn decode(&mut self, packet: Option<&MediaPacket>, drop: FrameDropMode) -> Result<Option<VideoFrame>> {
        let Some(packet) = packet else {
            return Ok(None);
        };
        if drop == FrameDropMode::SkipDecode {
            return Ok(None);
        }
        Ok(Some(VideoFrame {
            pts: None,
            reordered_pts: packet.pts,
            width: self.width,
            height: self.height,
            format: PixelFormat::RGBA,
            data: vec![0; (self.width * self.height * 4) as usize],
        }))
    }

    fn reset(&mut self) {}

    fn info(&self) -> String {
        format!("passthrough {}x{}", self.width, self.height)
    }
}

/// 文本字幕解码器：把解码出的文本记到共享日志里
pub struct TextSubtitleDecoder {
    log: Arc<Mutex<Vec<String>>>,
}

impl SubtitleDecoder for TextSubtitleDecoder {
    fn decode(&mut self, packet: &MediaPacket) {
        let text = String::from_utf8_lossy(&packet.data).into_owned();
        debug!("💬 字幕 {:?}: {}", packet.pts, text);
        self.log.lock().push(text);
    }

    fn update(&mut self, pts: f64) {
        trace!("💬 字幕时间 {:.3}", pts);
    }

    fn reset(&mut self) {}
}

/// 模拟音频设备：按时间源匀速消耗缓冲
pub struct SimulatedAudioOutput {
    time: Arc<dyn TimeSource>,
    format: AudioFormat,
    capacity: usize,
    /// 播放速率（1.0 为实时）
    drain_rate: f64,
    /// 上次结算时缓冲里的字节数
    level: f64,
    settled_at: f64,
    paused: bool,
    untimed: bool,
}

impl SimulatedAudioOutput {
    pub fn new(time: Arc<dyn TimeSource>, format: AudioFormat, buffer_seconds: f64) -> Self {
        let unit = format.unit_size().max(1);
        let mut capacity = (buffer_seconds * format.bytes_per_second()) as usize;
        capacity -= capacity % unit;
        let now = time.now();
        Self {
            time,
            format,
            capacity,
            drain_rate: 1.0,
            level: 0.0,
            settled_at: now,
            paused: false,
            untimed: false,
        }
    }

    fn level_now(&self) -> f64 {
        if self.paused {
            return self.level;
        }
        let elapsed = (self.time.now() - self.settled_at).max(0.0);
        (self.level - elapsed * self.format.bytes_per_second() * self.drain_rate).max(0.0)
    }

    fn settle(&mut self) {
        self.level = self.level_now();
        self.settled_at = self.time.now();
    }
}

impl AudioOutput for SimulatedAudioOutput {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, data: &[u8], final_chunk: bool) -> usize {
        if self.untimed {
            return data.len();
        }
        self.settle();
        let unit = self.format.unit_size().max(1);
        let mut accepted = data.len().min(self.get_space());
        if !final_chunk {
            accepted -= accepted % unit;
        }
        self.level += accepted as f64;
        accepted
    }

    fn get_space(&self) -> usize {
        if self.untimed {
            return self.capacity;
        }
        let unit = self.format.unit_size().max(1);
        let space = self.capacity.saturating_sub(self.level_now().ceil() as usize);
        space - space % unit
    }

    fn get_delay(&self) -> f64 {
        if self.untimed {
            return 0.0;
        }
        self.level_now() / self.format.bytes_per_second()
    }

    fn pause(&mut self) {
        self.settle();
        self.paused = true;
    }

    fn resume(&mut self) {
        self.settle();
        self.paused = false;
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.settled_at = self.time.now();
    }

    fn is_untimed(&self) -> bool {
        self.untimed
    }
}

/// 一次 flip 的记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipRecord {
    pub pts: f64,
    /// flip 发生时的时间源读数
    pub at: f64,
}

/// 记录每次 flip 的视频输出
pub struct RecordingVideoOutput {
    time: Arc<dyn TimeSource>,
    flips: Arc<Mutex<Vec<FlipRecord>>>,
    queued: Option<VideoFrame>,
    shown: bool,
    fail_configure: bool,
}

impl VideoOutput for RecordingVideoOutput {
    fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        if self.fail_configure {
            return Err(PlayerError::VideoOutputError(format!(
                "无法配置 {}x{}",
                width, height
            )));
        }
        Ok(())
    }

    fn has_buffered_frame(&self) -> bool {
        self.queued.is_some()
    }

    fn has_frame(&self) -> bool {
        self.shown
    }

    fn queue_frame(&mut self, frame: VideoFrame) {
        self.queued = Some(frame);
    }

    fn next_pts(&self) -> Option<f64> {
        self.queued.as_ref().and_then(|f| f.pts)
    }

    fn skip_frame(&mut self) {
        self.queued = None;
    }

    fn flip(&mut self, _target_time_us: i64) -> f64 {
        if let Some(frame) = self.queued.take() {
            let record = FlipRecord {
                pts: frame.pts.unwrap_or(f64::NAN),
                at: self.time.now(),
            };
            trace!("🖼️  flip {:?}", record);
            self.flips.lock().push(record);
            self.shown = true;
        }
        0.0
    }

    fn seek_reset(&mut self) {
        self.queued = None;
    }
}

/// 按时间表投递命令的命令源，等待时推动时间源
pub struct ScriptedCommandSource {
    time: Arc<dyn TimeSource>,
    script: VecDeque<(f64, PlayerCommand)>,
}

impl ScriptedCommandSource {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            script: VecDeque::new(),
        }
    }

    /// 在时间 `at` 投递一条命令；同一时间的命令按添加顺序投递
    pub fn at(mut self, at: f64, cmd: PlayerCommand) -> Self {
        let idx = self.script.iter().position(|(t, _)| *t > at).unwrap_or(self.script.len());
        self.script.insert(idx, (at, cmd));
        self
    }

    fn ready(&self) -> bool {
        self.script
            .front()
            .map_or(false, |(at, _)| *at <= self.time.now() + TIME_EPSILON)
    }
}

impl CommandSource for ScriptedCommandSource {
    fn wait(&mut self, timeout: f64) {
        if self.ready() || !(timeout > 0.0) {
            return;
        }
        let until_next = self
            .script
            .front()
            .map_or(timeout, |(at, _)| at - self.time.now());
        self.time.sleep(timeout.min(until_next));
    }

    fn peek(&mut self) -> Option<&PlayerCommand> {
        if !self.ready() {
            return None;
        }
        self.script.front().map(|(_, cmd)| cmd)
    }

    fn take(&mut self) -> Option<PlayerCommand> {
        if !self.ready() {
            return None;
        }
        self.script.pop_front().map(|(_, cmd)| cmd)
    }
}

/// 后端打开输出设备的次数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputOpens {
    pub audio: usize,
    pub video: usize,
}

/// 合成后端：直通解码器 + 模拟设备
pub struct SyntheticBackend {
    time: Arc<dyn TimeSource>,
    strip_audio_pts: usize,
    audio_buffer: f64,
    drain_rate: f64,
    untimed_audio: bool,
    fail_video_output: bool,
    fail_video_configure: bool,
    flips: Arc<Mutex<Vec<FlipRecord>>>,
    subtitle_log: Arc<Mutex<Vec<String>>>,
    opens: Arc<Mutex<OutputOpens>>,
}

impl SyntheticBackend {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            strip_audio_pts: 0,
            audio_buffer: 0.5,
            drain_rate: 1.0,
            untimed_audio: false,
            fail_video_output: false,
            fail_video_configure: false,
            flips: Arc::new(Mutex::new(Vec::new())),
            subtitle_log: Arc::new(Mutex::new(Vec::new())),
            opens: Arc::new(Mutex::new(OutputOpens::default())),
        }
    }

    /// 音频解码器前 `n` 个包不报告时间戳
    pub fn strip_audio_pts(mut self, n: usize) -> Self {
        self.strip_audio_pts = n;
        self
    }

    /// 模拟音频设备的缓冲时长（秒）
    pub fn audio_capacity(mut self, seconds: f64) -> Self {
        self.audio_buffer = seconds;
        self
    }

    pub fn drain_rate(mut self, rate: f64) -> Self {
        self.drain_rate = rate;
        self
    }

    pub fn untimed_audio(mut self) -> Self {
        self.untimed_audio = true;
        self
    }

    pub fn fail_video_output(mut self) -> Self {
        self.fail_video_output = true;
        self
    }

    pub fn fail_video_configure(mut self) -> Self {
        self.fail_video_configure = true;
        self
    }

    /// 所有视频输出共享的 flip 记录
    pub fn flips(&self) -> Arc<Mutex<Vec<FlipRecord>>> {
        self.flips.clone()
    }

    /// 字幕解码器解出的文本
    pub fn subtitle_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.subtitle_log.clone()
    }

    pub fn output_opens(&self) -> Arc<Mutex<OutputOpens>> {
        self.opens.clone()
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_audio_decoder(&mut self, track: &Track) -> Result<Box<dyn AudioDecoder>> {
        let format = track
            .audio_format
            .ok_or_else(|| PlayerError::DecodeError("音频轨道没有格式信息".to_string()))?;
        Ok(Box::new(PcmAudioDecoder {
            format,
            strip_pts: self.strip_audio_pts,
            decoded: 0,
        }))
    }

    fn open_video_decoder(&mut self, _track: &Track) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(PassthroughVideoDecoder {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }))
    }

    fn open_subtitle_decoder(&mut self, _track: &Track) -> Result<Box<dyn SubtitleDecoder>> {
        Ok(Box::new(TextSubtitleDecoder {
            log: self.subtitle_log.clone(),
        }))
    }

    fn open_audio_output(&mut self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        let mut ao = SimulatedAudioOutput::new(self.time.clone(), format, self.audio_buffer);
        ao.drain_rate = self.drain_rate;
        ao.untimed = self.untimed_audio;
        self.opens.lock().audio += 1;
        Ok(Box::new(ao))
    }

    fn open_video_output(&mut self) -> Result<Box<dyn VideoOutput>> {
        if self.fail_video_output {
            return Err(PlayerError::VideoOutputError("模拟的视频输出不可用".to_string()));
        }
        self.opens.lock().video += 1;
        Ok(Box::new(RecordingVideoOutput {
            time: self.time.clone(),
            flips: self.flips.clone(),
            queued: None,
            shown: false,
            fail_configure: self.fail_video_configure,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTimeSource, SampleFormat};

    #[test]
    fn test_seek_directions() {
        let mut demuxer = SyntheticDemuxer::new("v").with_video(10.0, 10);
        let backward = SeekFlags {
            absolute: true,
            backward: true,
            ..Default::default()
        };
        demuxer.seek(0.45, backward).unwrap();
        assert_eq!(demuxer.next_packet(StreamType::Video).unwrap().pts, Some(0.4));

        let forward = SeekFlags {
            absolute: true,
            forward: true,
            ..Default::default()
        };
        demuxer.seek(0.45, forward).unwrap();
        assert_eq!(demuxer.next_packet(StreamType::Video).unwrap().pts, Some(0.5));

        demuxer.seek(5.0, forward).unwrap();
        assert!(demuxer.next_packet(StreamType::Video).is_none());
        assert!(demuxer.is_eof(StreamType::Video));
    }

    #[test]
    fn test_deselected_stream_is_silent() {
        let format = AudioFormat::new(8000, 1, SampleFormat::U8);
        let mut demuxer = SyntheticDemuxer::new("a").with_audio(format, 1.0, 0.1);
        demuxer.select_stream(StreamType::Audio, None);
        assert!(demuxer.next_packet(StreamType::Audio).is_none());
        demuxer.select_stream(StreamType::Audio, Some(0));
        assert_eq!(demuxer.next_packet(StreamType::Audio).unwrap().data.len(), 800);
        assert!((demuxer.stream_length().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_selection_picks_one_stream_per_type() {
        let format = AudioFormat::new(8000, 1, SampleFormat::U8);
        let mut demuxer = SyntheticDemuxer::new("multi")
            .with_video(10.0, 5)
            .with_audio(format, 1.0, 0.1)
            .with_audio_from(format, 5.0, 1.0, 0.1);
        let ids: Vec<(StreamType, u32, usize)> = demuxer
            .tracks()
            .iter()
            .map(|t| (t.stream_type, t.id.0, t.demuxer_id))
            .collect();
        assert_eq!(
            ids,
            vec![
                (StreamType::Video, 1, 0),
                (StreamType::Audio, 1, 1),
                (StreamType::Audio, 2, 2),
            ]
        );
        demuxer.select_stream(StreamType::Audio, Some(2));
        assert_eq!(demuxer.next_packet(StreamType::Audio).unwrap().pts, Some(5.0));
        demuxer.select_stream(StreamType::Audio, Some(1));
        assert_eq!(demuxer.next_packet(StreamType::Audio).unwrap().pts, Some(0.0));
        assert_eq!(demuxer.next_packet(StreamType::Video).unwrap().pts, Some(0.0));
    }

    #[test]
    fn test_simulated_output_drains_over_time() {
        let time = Arc::new(ManualTimeSource::new());
        let format = AudioFormat::new(8000, 2, SampleFormat::I16);
        let mut ao = SimulatedAudioOutput::new(time.clone(), format, 0.5);
        assert_eq!(ao.get_space(), 16000);
        assert_eq!(ao.write(&[0; 20000], false), 16000);
        assert!((ao.get_delay() - 0.5).abs() < 1e-9);

        time.advance(0.25);
        assert_eq!(ao.get_space(), 8000);
        ao.pause();
        time.advance(1.0);
        assert!((ao.get_delay() - 0.25).abs() < 1e-9);
        ao.resume();
        time.advance(1.0);
        assert_eq!(ao.get_delay(), 0.0);
    }

    #[test]
    fn test_backend_skews_drain_rate() {
        let time = Arc::new(ManualTimeSource::new());
        let format = AudioFormat::new(8000, 2, SampleFormat::I16);
        let mut backend = SyntheticBackend::new(time.clone()).drain_rate(2.0);
        let mut ao = backend.open_audio_output(format).unwrap();
        ao.write(&[0; 16000], false);
        time.advance(0.1);
        assert!((ao.get_delay() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_scripted_commands_wait_for_their_time() {
        let time = Arc::new(ManualTimeSource::new());
        let mut input = ScriptedCommandSource::new(time.clone())
            .at(1.0, PlayerCommand::Quit)
            .at(0.5, PlayerCommand::CyclePause);
        assert!(input.peek().is_none());
        input.wait(10.0);
        assert!((time.now() - 0.5).abs() < 1e-9);
        assert_eq!(input.take(), Some(PlayerCommand::CyclePause));
        input.wait(0.2);
        assert!(input.take().is_none());
        input.wait(10.0);
        assert_eq!(input.take(), Some(PlayerCommand::Quit));
    }
}
