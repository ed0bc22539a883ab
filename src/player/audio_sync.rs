//! 音频缓冲与起播对齐
//!
//! 解码出的 PCM 先进入一块临时缓冲，每次迭代按设备空闲空间写出。
//! 写出的字节数折算成秒累加到 `delay`，视频侧每显示一帧再减去帧时长。

use crate::core::{AudioFormat, AudioFrame, PlaybackOptions, Result, StreamType, Track, TrackId};
use crate::player::context::SyncState;
use crate::player::{log_ctx, AudioDecoder, AudioOutput, DemuxerSource, MediaBackend, PlaybackContext};
use log::{debug, error, info, warn};

/// 对齐时最少一次解码的字节数
const MIN_SYNC_DECODE: usize = 20000;

/// 音视频时间差超过这个值（秒）视为时间戳断裂，放弃对齐
const MAX_SYNC_DIFF: f64 = 300.0;

/// 对齐循环的轮数上限
const MAX_SYNC_ROUNDS: usize = 1000;

/// 解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// 缓冲已达到要求的长度
    Ok,
    /// 流结束，缓冲可能不足
    Eof,
    /// 输出格式变化，需要重建音频输出
    FormatChanged,
}

/// 起播对齐的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartSync {
    Decoded(DecodeStatus),
    /// 已经写入了一段静音，本次迭代不再写
    PlayDone,
}

/// 一次填充音频设备的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFill {
    /// 设备缓冲已写满
    Full,
    /// 数据不足，没能写满
    Partial,
    /// 音频流已结束且全部写出
    Eof,
}

/// 音频链路：解码器 + 输出设备 + 临时缓冲
pub struct AudioChain {
    pub(crate) track: TrackId,
    /// 轨道所在的数据源索引
    pub(crate) source: usize,
    pub(crate) decoder: Box<dyn AudioDecoder>,
    pub(crate) ao: Box<dyn AudioOutput>,
    pub(crate) format: AudioFormat,
    /// 已解码、尚未写给设备的 PCM
    pub(crate) buffer: Vec<u8>,
    /// 上次写出时设备没有接受的字节数
    pub(crate) buffer_playable_size: usize,
    /// 最近一个带时间戳的帧的 pts
    pub(crate) pts: Option<f64>,
    /// 该 pts 之后解码出的字节数
    pub(crate) pts_bytes: usize,
    /// 格式变化后暂存的第一帧
    pending: Option<AudioFrame>,
    pub(crate) eof: bool,
}

impl AudioChain {
    /// 打开解码器和输出设备
    ///
    /// `kept` 是无缝切换时留下的输出设备，格式相同就直接沿用，已缓冲的数据继续播放
    pub(crate) fn open(
        track: &Track,
        source: usize,
        backend: &mut dyn MediaBackend,
        kept: Option<Box<dyn AudioOutput>>,
    ) -> Result<Self> {
        let decoder = backend.open_audio_decoder(track)?;
        let format = decoder.format();
        let ao = match kept {
            Some(ao) if ao.format() == format => {
                info!("{} 🔗 沿用音频输出: {} Hz, {} 声道", log_ctx(), format.sample_rate, format.channels);
                ao
            }
            other => {
                // 格式不同，先释放旧设备
                drop(other);
                let ao = backend.open_audio_output(format)?;
                info!(
                    "{} 🔊 音频输出: {} Hz, {} 声道, {:?}",
                    log_ctx(),
                    format.sample_rate,
                    format.channels,
                    format.sample_format
                );
                ao
            }
        };
        Ok(Self {
            track: track.id,
            source,
            decoder,
            ao,
            format,
            buffer: Vec::new(),
            buffer_playable_size: 0,
            pts: None,
            pts_bytes: 0,
            pending: None,
            eof: false,
        })
    }

    /// 格式变化后按新格式重开输出设备，解码器保留
    pub(crate) fn reopen_output(mut self, backend: &mut dyn MediaBackend) -> Result<Self> {
        let format = match &self.pending {
            Some(frame) => frame.format,
            None => self.decoder.format(),
        };
        info!(
            "{} 🔄 音频格式变化: {} Hz/{} 声道 -> {} Hz/{} 声道",
            log_ctx(),
            self.format.sample_rate,
            self.format.channels,
            format.sample_rate,
            format.channels
        );
        // 先释放旧设备
        drop(std::mem::replace(&mut self.ao, backend.open_audio_output(format)?));
        self.format = format;
        self.buffer.clear();
        self.buffer_playable_size = 0;
        Ok(self)
    }

    fn bytes_per_second(&self) -> f64 {
        self.format.bytes_per_second()
    }

    fn append(&mut self, frame: AudioFrame) {
        if let Some(pts) = frame.pts {
            self.pts = Some(pts);
            self.pts_bytes = 0;
        }
        self.pts_bytes += frame.data.len();
        self.buffer.extend_from_slice(&frame.data);
    }

    /// 解码直到缓冲至少有 `min_len` 字节
    ///
    /// 单个包解码失败只跳过该包
    pub(crate) fn decode_audio(&mut self, demuxer: &mut dyn DemuxerSource, min_len: usize) -> DecodeStatus {
        if let Some(frame) = self.pending.take() {
            if frame.format != self.format {
                self.pending = Some(frame);
                return DecodeStatus::FormatChanged;
            }
            self.append(frame);
        }
        while self.buffer.len() < min_len {
            let Some(packet) = demuxer.next_packet(StreamType::Audio) else {
                self.eof = true;
                return DecodeStatus::Eof;
            };
            match self.decoder.decode(&packet) {
                Ok(Some(frame)) => {
                    if frame.format != self.format {
                        self.pending = Some(frame);
                        return DecodeStatus::FormatChanged;
                    }
                    self.append(frame);
                }
                Ok(None) => {}
                Err(e) => warn!("⚠️  音频解码失败，跳过该包: {}", e),
            }
        }
        DecodeStatus::Ok
    }

    /// 已交给设备的音频末尾对应的时间戳
    ///
    /// 最近一个已知 pts 加上其后解码的时长，减去还在解码器和临时缓冲里的部分
    pub(crate) fn written_pts(&self, speed: f64, video_offset: f64) -> Option<f64> {
        let bps = self.bytes_per_second();
        let mut pts = self.pts? + self.pts_bytes as f64 / bps;
        let buffered = (self.decoder.buffered_bytes() + self.buffer.len()) as f64;
        pts -= buffered * speed / bps;
        Some(pts + video_offset)
    }

    /// 正在播放的音频对应的时间戳
    pub(crate) fn playing_pts(&self, speed: f64, video_offset: f64) -> Option<f64> {
        self.written_pts(speed, video_offset)
            .map(|pts| pts - speed * self.ao.get_delay())
    }

    /// seek 后清空解码状态；`reset_ao` 时同时丢弃设备里的数据
    pub(crate) fn reset(&mut self, reset_ao: bool) {
        self.decoder.reset();
        if reset_ao {
            self.ao.reset();
        }
        self.buffer.clear();
        self.buffer_playable_size = 0;
        self.pending = None;
        self.pts = None;
        self.pts_bytes = 0;
        self.eof = false;
    }
}

/// 写给设备并把写出的时长记入 `delay`；暂停时不写
pub(crate) fn write_to_ao(
    ao: &mut dyn AudioOutput,
    state: &mut SyncState,
    data: &[u8],
    final_chunk: bool,
    bps: f64,
    speed: f64,
) -> usize {
    if state.paused || data.is_empty() {
        return 0;
    }
    let played = ao.write(data, final_chunk);
    if played > 0 {
        state.delay += played as f64 * speed / bps;
    }
    played
}

/// 起播对齐：让写给设备的第一个字节正好对应目标位置
///
/// 目标是精确 seek 的位置（纯音频），或者当前视频帧 + delay + audio_delay。
/// 音频太早就从前面裁掉多余的字节，太晚就在前面补静音
pub(crate) fn audio_start_sync(
    chain: &mut AudioChain,
    demuxer: &mut dyn DemuxerSource,
    state: &mut SyncState,
    opts: &PlaybackOptions,
    video_pts: Option<f64>,
    playsize: usize,
) -> StartSync {
    // 先解一点数据，拿到时间信息
    let res = chain.decode_audio(demuxer, 1);
    if res != DecodeStatus::Ok {
        return StartSync::Decoded(res);
    }

    let speed = opts.playback_speed;
    let bps = chain.bytes_per_second() / speed;
    let unit = chain.format.unit_size().max(1) as i64;
    let hrseek = state.hrseek_active;
    state.hrseek_active = false;

    let mut did_retry = false;
    let mut rounds = 0;
    let mut written;
    let mut bytes: i64;
    loop {
        rounds += 1;
        written = chain.written_pts(speed, state.video_offset);
        let target = if hrseek {
            Some(state.hrseek_pts)
        } else {
            video_pts.map(|v| v + state.delay + state.audio_delay)
        };
        let ptsdiff = match (written, target) {
            (Some(w), Some(t)) => w - t,
            _ => f64::NAN,
        };
        bytes = if ptsdiff.is_finite() { (ptsdiff * bps) as i64 } else { 0 };
        bytes -= bytes % unit;

        // 有些容器开头的包不带时间戳，往后多读一些
        if chain.pts.is_none() {
            if !did_retry {
                debug!("⏳ 音频还没有时间戳，多读一秒再对齐");
                let res = chain.decode_audio(demuxer, chain.buffer.len() + chain.bytes_per_second() as usize);
                if res != DecodeStatus::Ok {
                    return StartSync::Decoded(res);
                }
                did_retry = true;
                continue;
            }
            bytes = 0;
        }

        if ptsdiff.is_nan() || ptsdiff.abs() > MAX_SYNC_DIFF || rounds > MAX_SYNC_ROUNDS {
            bytes = 0;
        }

        if bytes > 0 {
            break;
        }

        // 音频太早：裁掉目标之前的部分
        state.syncing_audio = false;
        let want = (-bytes).min(playsize.max(MIN_SYNC_DECODE) as i64) as usize;
        let res = chain.decode_audio(demuxer, want);
        let keep = bytes + chain.buffer.len() as i64;
        if keep >= 0 {
            let keep = keep as usize;
            let cut = chain.buffer.len() - keep;
            chain.buffer.drain(..cut);
            if res != DecodeStatus::Ok {
                return StartSync::Decoded(res);
            }
            return StartSync::Decoded(chain.decode_audio(demuxer, playsize));
        }
        chain.buffer.clear();
        if res != DecodeStatus::Ok {
            return StartSync::Decoded(res);
        }
    }

    // 纯音频精确 seek 不补静音
    if hrseek {
        return StartSync::Decoded(DecodeStatus::Ok);
    }

    let bytes = bytes as usize;
    let fill = chain.format.silence_byte();
    if bytes >= playsize {
        // 整个周期都是静音，不进临时缓冲，免得静音越积越多
        let silence = vec![fill; playsize];
        let bps_raw = chain.bytes_per_second();
        write_to_ao(chain.ao.as_mut(), state, &silence, false, bps_raw, speed);
        return StartSync::PlayDone;
    }
    state.syncing_audio = false;
    debug!("🔇 音频晚于目标，前面补 {} 字节静音", bytes);
    let mut padded = vec![fill; bytes];
    padded.extend_from_slice(&chain.buffer);
    chain.buffer = padded;
    StartSync::Decoded(chain.decode_audio(demuxer, playsize))
}

enum FillOutcome {
    Done(AudioFill),
    FormatChanged,
}

fn fill_chain(
    chain: &mut AudioChain,
    demuxer: &mut dyn DemuxerSource,
    state: &mut SyncState,
    opts: &PlaybackOptions,
    video_pts: Option<f64>,
    has_video: bool,
    endpts: Option<f64>,
) -> FillOutcome {
    let speed = opts.playback_speed;
    let unit = chain.format.unit_size().max(1);
    let bps = chain.bytes_per_second();
    let mut final_chunk = false;
    let mut audio_eof = false;
    let mut partial_fill = false;

    // 暂停时只解一点，保证音频时间戳可用
    let mut playsize = if state.paused { 1 } else { chain.ao.get_space() };

    // 走到这里 hrseek_active 还在，说明是纯音频
    if !has_video {
        state.syncing_audio = false;
    }
    if !opts.initial_audio_sync {
        state.syncing_audio = false;
        state.hrseek_active = false;
    }

    let res = if state.syncing_audio || state.hrseek_active {
        audio_start_sync(chain, demuxer, state, opts, video_pts, playsize)
    } else {
        StartSync::Decoded(chain.decode_audio(demuxer, playsize))
    };
    match res {
        StartSync::Decoded(DecodeStatus::FormatChanged) => return FillOutcome::FormatChanged,
        StartSync::PlayDone => return FillOutcome::Done(AudioFill::Full),
        StartSync::Decoded(DecodeStatus::Eof) => audio_eof = true,
        StartSync::Decoded(DecodeStatus::Ok) => {}
    }

    // 截断到播放结束时间
    if let (Some(end), Some(written)) = (endpts, chain.written_pts(speed, state.video_offset)) {
        let bytes = (end - written + state.audio_delay) * bps / speed;
        if playsize as f64 > bytes {
            playsize = bytes.max(0.0) as usize;
            final_chunk = true;
            audio_eof = true;
            partial_fill = true;
        }
    }

    if playsize > chain.buffer.len() {
        partial_fill = true;
        playsize = chain.buffer.len();
        if audio_eof {
            final_chunk = true;
        }
    }
    playsize -= playsize % unit;
    if playsize == 0 {
        return FillOutcome::Done(match (partial_fill, audio_eof) {
            (true, true) => AudioFill::Eof,
            (true, false) => AudioFill::Partial,
            _ => AudioFill::Full,
        });
    }

    let played = write_to_ao(
        chain.ao.as_mut(),
        state,
        &chain.buffer[..playsize],
        final_chunk,
        bps,
        speed,
    );
    chain.buffer_playable_size = playsize - played;

    if played > 0 {
        chain.buffer.drain(..played);
    } else if !state.paused && audio_eof && chain.ao.get_delay() < 0.04 {
        // 设备不接受不足一个周期的尾巴，避免卡在这里
        return FillOutcome::Done(AudioFill::Eof);
    }

    FillOutcome::Done(if partial_fill { AudioFill::Partial } else { AudioFill::Full })
}

impl PlaybackContext {
    /// 把音频写进设备缓冲，必要时先做起播对齐
    pub(crate) fn fill_audio_out_buffers(&mut self, endpts: Option<f64>) -> AudioFill {
        let video_pts = self.video.as_ref().and_then(|v| v.pts);
        let has_video = self.video.is_some();
        let Some(chain) = self.audio.as_mut() else {
            return AudioFill::Eof;
        };
        let Some(demuxer) = self.sources.get_mut(chain.source) else {
            return AudioFill::Eof;
        };
        let outcome = fill_chain(
            chain,
            demuxer.as_mut(),
            &mut self.state,
            &self.opts,
            video_pts,
            has_video,
            endpts,
        );
        match outcome {
            FillOutcome::Done(fill) => fill,
            FillOutcome::FormatChanged => {
                self.reinit_audio_chain();
                AudioFill::Partial
            }
        }
    }

    /// 已交给音频设备的音频末尾时间戳
    pub fn written_audio_pts(&self) -> Option<f64> {
        self.audio
            .as_ref()
            .and_then(|a| a.written_pts(self.opts.playback_speed, self.state.video_offset))
    }

    /// 正在播放的音频时间戳
    pub fn playing_audio_pts(&self) -> Option<f64> {
        self.audio
            .as_ref()
            .and_then(|a| a.playing_pts(self.opts.playback_speed, self.state.video_offset))
    }

    /// 音频链路无法继续时整个关掉，继续播放其他流
    pub(crate) fn drop_audio_chain(&mut self, reason: &str) {
        self.audio = None;
        self.gapless_ao = None;
        error!("{} ❌ 关闭音频: {}", log_ctx(), reason);
        self.current_track[StreamType::Audio.index()] = None;
        self.preselect_demux_stream(StreamType::Audio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTimeSource, PlaybackOptions, SampleFormat};
    use crate::player::synthetic::{SyntheticBackend, SyntheticDemuxer, ScriptedCommandSource};
    use std::sync::Arc;

    fn format() -> AudioFormat {
        AudioFormat::new(8000, 2, SampleFormat::I16)
    }

    fn context(opts: PlaybackOptions, demuxer: SyntheticDemuxer, backend: SyntheticBackend, time: Arc<ManualTimeSource>) -> PlaybackContext {
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = PlaybackContext::new(
            opts,
            vec![Box::new(demuxer)],
            Box::new(backend),
            Box::new(input),
            time,
        )
        .unwrap();
        ctx.load().unwrap();
        ctx
    }

    #[test]
    fn test_written_pts_accounts_buffered_bytes() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(format(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        let chain = ctx.audio.as_mut().unwrap();
        let demuxer = ctx.sources[0].as_mut();
        // 两个 0.1s 的包
        assert_eq!(chain.decode_audio(demuxer, 6400), DecodeStatus::Ok);
        assert_eq!(chain.pts, Some(0.1));
        assert_eq!(chain.pts_bytes, 3200);
        // 缓冲里还有 0.2s 没写出
        let written = chain.written_pts(1.0, 0.0).unwrap();
        assert!(written.abs() < 1e-9);
        chain.buffer.drain(..3200);
        let written = chain.written_pts(1.0, 0.0).unwrap();
        assert!((written - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_write_to_ao_accumulates_delay() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(format(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        let chain = ctx.audio.as_mut().unwrap();
        let data = vec![0u8; 16000];
        let played = write_to_ao(chain.ao.as_mut(), &mut ctx.state, &data, false, 32000.0, 1.0);
        assert_eq!(played, 16000);
        assert!((ctx.state.delay - 0.5).abs() < 1e-9);

        ctx.state.paused = true;
        let played = write_to_ao(chain.ao.as_mut(), &mut ctx.state, &data, false, 32000.0, 1.0);
        assert_eq!(played, 0);
        assert!((ctx.state.delay - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_start_sync_trims_early_audio() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video_pts(&[0.5, 0.54])
            .with_audio(format(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        ctx.state.syncing_audio = true;

        let chain = ctx.audio.as_mut().unwrap();
        let demuxer = ctx.sources[0].as_mut();
        let res = audio_start_sync(chain, demuxer, &mut ctx.state, &ctx.opts, Some(0.5), 1600);
        assert_eq!(res, StartSync::Decoded(DecodeStatus::Ok));
        assert!(!ctx.state.syncing_audio);
        // 缓冲开头对应 0.5s
        let chain = ctx.audio.as_ref().unwrap();
        let head = chain.written_pts(1.0, 0.0).unwrap();
        assert!((head - 0.5).abs() < 1e-6, "head = {}", head);
    }

    #[test]
    fn test_start_sync_pads_late_audio_with_silence() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video_pts(&[0.0, 0.04])
            .with_audio_from(format(), 0.05, 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        ctx.state.syncing_audio = true;

        let chain = ctx.audio.as_mut().unwrap();
        let demuxer = ctx.sources[0].as_mut();
        let res = audio_start_sync(chain, demuxer, &mut ctx.state, &ctx.opts, Some(0.0), 3200);
        assert_eq!(res, StartSync::Decoded(DecodeStatus::Ok));
        let chain = ctx.audio.as_ref().unwrap();
        // 0.05s 的静音 = 1600 字节
        assert!(chain.buffer[..1600].iter().all(|&b| b == 0));
        assert!(chain.buffer.len() >= 3200);
        assert!(!ctx.state.syncing_audio);
    }

    #[test]
    fn test_start_sync_without_pts_falls_back_to_zero_offset() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video_pts(&[0.0, 0.04])
            .with_audio(format(), 3.0, 0.1);
        // 解码器从不报告时间戳
        let backend = SyntheticBackend::new(time.clone()).strip_audio_pts(usize::MAX);
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        ctx.state.syncing_audio = true;
        ctx.state.video_pts = Some(0.0);

        let fill = ctx.fill_audio_out_buffers(None);
        assert_ne!(fill, AudioFill::Eof);
        assert!(!ctx.state.syncing_audio);
        // 没有裁剪也没有补静音，数据直接写出
        assert!(ctx.state.delay > 0.0);
        assert!(ctx.written_audio_pts().is_none());
    }

    #[test]
    fn test_start_sync_reads_ahead_past_missing_pts() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video_pts(&[0.0, 0.04])
            .with_audio(format(), 3.0, 0.1);
        // 前 3 个包没有时间戳
        let backend = SyntheticBackend::new(time.clone()).strip_audio_pts(3);
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        ctx.state.syncing_audio = true;

        let fill = ctx.fill_audio_out_buffers(None);
        assert_ne!(fill, AudioFill::Eof);
        assert!(!ctx.state.syncing_audio);
        assert!(ctx.written_audio_pts().is_some());
    }

    #[test]
    fn test_fill_truncates_at_end_pts() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(format(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time);
        ctx.state.restart_playback = false;

        assert_eq!(ctx.fill_audio_out_buffers(Some(0.25)), AudioFill::Partial);
        let written = ctx.written_audio_pts().unwrap();
        assert!((written - 0.25).abs() < 1e-6, "written = {}", written);
        assert!((ctx.state.delay - 0.25).abs() < 1e-6);
        // 已经写到结束位置
        assert_eq!(ctx.fill_audio_out_buffers(Some(0.25)), AudioFill::Eof);
    }

    #[test]
    fn test_fill_reports_eof_after_stream_end() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(format(), 0.2, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let mut ctx = context(PlaybackOptions::default(), demuxer, backend, time.clone());

        assert_eq!(ctx.fill_audio_out_buffers(None), AudioFill::Partial);
        // 设备播完后再填充
        time.advance(1.0);
        assert_eq!(ctx.fill_audio_out_buffers(None), AudioFill::Eof);
    }
}
