//! 视频泵：读包、解码、确定帧时间戳，把下一帧排进视频输出
//!
//! 每次调用最多送一个包进解码器。返回的帧时长由播放循环累加到 `time_frame`，
//! 有音频时同时从 `delay` 里扣掉。

use crate::core::{FrameDropMode, PlaybackOptions, Result, StreamType, Track, TrackId, VideoFrame};
use crate::player::context::SyncState;
use crate::player::framedrop::check_framedrop;
use crate::player::pts::{correct_decreasing_pts, FramePts};
use crate::player::{log_ctx, DemuxerSource, MediaBackend, MediaPacket, PlaybackContext, VideoDecoder, VideoOutput};
use log::{debug, error, info, warn};

/// 精确 seek 的容差（秒）
pub(crate) const HRSEEK_TOLERANCE: f64 = 0.005;

/// 没有帧率信息时假定 25 fps
const DEFAULT_FRAME_TIME: f64 = 0.04;

/// 一次视频更新的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoUpdate {
    /// 新的一帧已排队，值为和上一帧的时间差（秒）
    Frame(f64),
    /// 还没有可显示的帧
    Pending,
    /// 视频流结束
    Eof,
    /// 视频输出无法初始化，整个视频链路需要关闭
    InitFailed,
}

/// 视频链路：解码器和时间戳跟踪
pub struct VideoChain {
    pub(crate) track: TrackId,
    pub(crate) source: usize,
    pub(crate) decoder: Box<dyn VideoDecoder>,
    pub(crate) frame_pts: FramePts,
    /// 排队（或刚显示）的帧的时间戳
    pub(crate) pts: Option<f64>,
    pub(crate) last_pts: Option<f64>,
    /// 标称帧时长
    pub(crate) frame_time: f64,
    /// 视频输出当前配置的尺寸
    pub(crate) configured: Option<(u32, u32)>,
}

impl VideoChain {
    pub(crate) fn open(track: &Track, source: usize, backend: &mut dyn MediaBackend) -> Result<Self> {
        let decoder = backend.open_video_decoder(track)?;
        let frame_time = match track.fps {
            Some(fps) if fps > 0.0 => 1.0 / fps,
            _ => DEFAULT_FRAME_TIME,
        };
        info!(
            "{} 🎬 视频解码器: {} ({:.3} fps)",
            log_ctx(),
            decoder.info(),
            1.0 / frame_time
        );
        Ok(Self {
            track: track.id,
            source,
            decoder,
            frame_pts: FramePts::new(),
            pts: None,
            last_pts: None,
            frame_time,
            configured: None,
        })
    }

    /// seek 后丢弃解码器和时间戳状态
    pub(crate) fn reset(&mut self) {
        self.decoder.reset();
        self.frame_pts.reset();
        self.pts = None;
        self.last_pts = None;
    }
}

enum Feed {
    Queued,
    NoFrame,
    Eof,
    ConfigFailed,
}

/// 跳过占位包，读下一个真正的视频包
fn read_packet(demuxer: &mut dyn DemuxerSource) -> Option<MediaPacket> {
    loop {
        match demuxer.next_packet(StreamType::Video) {
            Some(p) if p.is_placeholder() => continue,
            other => return other,
        }
    }
}

/// 尺寸变化时重新配置输出，然后把帧排进去
fn queue_frame(chain: &mut VideoChain, vo: &mut dyn VideoOutput, frame: VideoFrame) -> bool {
    let size = (frame.width, frame.height);
    if chain.configured != Some(size) {
        if let Err(e) = vo.configure(size.0, size.1) {
            error!("{} ❌ 视频输出配置失败 {}x{}: {}", log_ctx(), size.0, size.1, e);
            return false;
        }
        info!("{} 🖥️  视频输出: {}x{} {:?}", log_ctx(), size.0, size.1, frame.format);
        chain.configured = Some(size);
    }
    vo.queue_frame(frame);
    true
}

fn feed_decoder(
    chain: &mut VideoChain,
    demuxer: &mut dyn DemuxerSource,
    vo: &mut dyn VideoOutput,
    state: &mut SyncState,
    opts: &PlaybackOptions,
    ao_delay: Option<f64>,
) -> Feed {
    let packet = read_packet(demuxer);
    let pts = packet.as_ref().and_then(|p| p.pts).map(|p| p + state.video_offset);
    if let Some(pts) = pts {
        if pts >= state.hrseek_pts - HRSEEK_TOLERANCE {
            state.hrseek_framedrop = false;
        }
        chain.frame_pts.push_packet_pts(pts);
    }
    let drop = if state.hrseek_framedrop {
        FrameDropMode::SkipDisplay
    } else {
        check_framedrop(
            state,
            ao_delay,
            opts.playback_speed,
            opts.frame_dropping,
            chain.frame_time,
        )
    };

    let decoded = match chain.decoder.decode(packet.as_ref(), drop) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("{} ⚠️  视频解码失败: {}", log_ctx(), e);
            None
        }
    };
    match decoded {
        Some(mut frame) => {
            let reordered = frame.reordered_pts.map(|p| p + state.video_offset);
            chain.frame_pts.on_frame(reordered);
            if drop != FrameDropMode::None {
                return Feed::NoFrame;
            }
            chain.pts = chain
                .frame_pts
                .determine(opts.pts_assoc_mode, demuxer.timestamps_are_pts());
            frame.pts = chain.pts;
            if queue_frame(chain, vo, frame) {
                Feed::Queued
            } else {
                Feed::ConfigFailed
            }
        }
        None if packet.is_none() => Feed::Eof,
        None => Feed::NoFrame,
    }
}

impl PlaybackContext {
    /// 丢帧判断参考的音频设备延迟；没有可用的音频时钟时为 None
    fn framedrop_reference(&self) -> Option<f64> {
        let audio = self.audio.as_ref()?;
        if audio.ao.is_untimed() {
            return None;
        }
        let eof = self
            .sources
            .get(audio.source)
            .map_or(true, |d| d.is_eof(StreamType::Audio));
        if eof {
            return None;
        }
        Some(audio.ao.get_delay())
    }

    /// 准备下一帧
    pub(crate) fn update_video(&mut self) -> VideoUpdate {
        if !self.opts.correct_pts {
            return self.update_video_nocorrect_pts();
        }
        let ao_delay = self.framedrop_reference();
        let has_audio = self.audio.is_some();
        let Some(chain) = self.video.as_mut() else {
            return VideoUpdate::Eof;
        };
        let Some(vo) = self.vo.as_mut() else {
            return VideoUpdate::InitFailed;
        };
        let Some(demuxer) = self.sources.get_mut(chain.source) else {
            return VideoUpdate::Eof;
        };
        let state = &mut self.state;

        if !vo.has_buffered_frame() {
            match feed_decoder(chain, demuxer.as_mut(), vo.as_mut(), state, &self.opts, ao_delay) {
                Feed::ConfigFailed => return VideoUpdate::InitFailed,
                Feed::Eof if !vo.has_buffered_frame() => return VideoUpdate::Eof,
                _ => {}
            }
        }

        if !vo.has_buffered_frame() {
            return VideoUpdate::Pending;
        }

        let pts = match vo.next_pts().or(chain.pts).or(chain.last_pts) {
            Some(pts) => pts,
            None => {
                error!("{} ❌ 视频帧缺少时间戳", log_ctx());
                chain.last_pts.unwrap_or(0.0)
            }
        };
        if state.hrseek_active && pts < state.hrseek_pts - HRSEEK_TOLERANCE {
            vo.skip_frame();
            return VideoUpdate::Pending;
        }
        state.hrseek_active = false;

        let (pts, last) = match chain.last_pts {
            None => (pts, pts),
            Some(last) => {
                if last > pts {
                    info!("{} ⏪ 视频时间戳倒退: {:.3} < {:.3}", log_ctx(), pts, last);
                }
                correct_decreasing_pts(last, pts, self.opts.decreasing_pts_threshold)
            }
        };
        chain.pts = Some(pts);
        let frame_time = pts - last;
        chain.last_pts = Some(pts);
        if has_audio {
            state.delay -= frame_time;
        }
        VideoUpdate::Frame(frame_time)
    }

    /// 不信任时间戳时按标称帧率计时
    fn update_video_nocorrect_pts(&mut self) -> VideoUpdate {
        let ao_delay = self.framedrop_reference();
        let has_audio = self.audio.is_some();
        let Some(chain) = self.video.as_mut() else {
            return VideoUpdate::Eof;
        };
        let Some(vo) = self.vo.as_mut() else {
            return VideoUpdate::InitFailed;
        };
        let Some(demuxer) = self.sources.get_mut(chain.source) else {
            return VideoUpdate::Eof;
        };
        let state = &mut self.state;

        if vo.has_buffered_frame() {
            return VideoUpdate::Pending;
        }
        let frame_time = if state.restart_playback { 0.0 } else { chain.frame_time };
        let Some(packet) = read_packet(demuxer.as_mut()) else {
            return VideoUpdate::Eof;
        };
        if has_audio {
            state.delay -= frame_time;
        }
        let drop = check_framedrop(
            state,
            ao_delay,
            self.opts.playback_speed,
            self.opts.frame_dropping,
            chain.frame_time,
        );
        let pts = match (packet.pts, chain.pts) {
            (Some(p), _) => p + state.video_offset,
            (None, Some(prev)) => prev + frame_time,
            (None, None) => state.video_offset,
        };
        chain.pts = Some(pts);
        chain.last_pts = Some(pts);

        match chain.decoder.decode(Some(&packet), drop) {
            Ok(Some(mut frame)) if drop == FrameDropMode::None => {
                frame.pts = Some(pts);
                if !queue_frame(chain, vo.as_mut(), frame) {
                    return VideoUpdate::InitFailed;
                }
            }
            Ok(_) => debug!("🗑️  丢弃帧 {:.3}", pts),
            Err(e) => warn!("{} ⚠️  视频解码失败: {}", log_ctx(), e),
        }
        VideoUpdate::Frame(frame_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTimeSource, PlaybackOptions};
    use crate::player::synthetic::{ScriptedCommandSource, SyntheticBackend, SyntheticDemuxer};
    use std::sync::Arc;

    fn video_context(opts: PlaybackOptions, pts: &[f64]) -> PlaybackContext {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video_pts(pts);
        let backend = SyntheticBackend::new(time.clone());
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

    fn take_frame(ctx: &mut PlaybackContext) -> VideoUpdate {
        let update = ctx.update_video();
        if let Some(vo) = ctx.vo.as_mut() {
            vo.skip_frame();
        }
        update
    }

    #[test]
    fn test_frame_times_follow_pts() {
        let mut ctx = video_context(PlaybackOptions::default(), &[0.0, 0.04, 0.08]);
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(0.0));
        match take_frame(&mut ctx) {
            VideoUpdate::Frame(ft) => assert!((ft - 0.04).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(take_frame(&mut ctx), VideoUpdate::Frame(_)));
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Eof);
    }

    #[test]
    fn test_placeholder_packets_are_skipped() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v")
            .with_video_pts(&[0.0, 0.04])
            .with_placeholder_packets();
        let backend = SyntheticBackend::new(time.clone());
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = PlaybackContext::new(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            Box::new(backend),
            Box::new(input),
            time,
        )
        .unwrap();
        ctx.load().unwrap();
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(0.0));
        assert!(matches!(take_frame(&mut ctx), VideoUpdate::Frame(ft) if (ft - 0.04).abs() < 1e-9));
    }

    #[test]
    fn test_small_pts_decrease_is_jitter() {
        let mut ctx = video_context(PlaybackOptions::default(), &[1.0, 0.96, 1.08]);
        take_frame(&mut ctx);
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(0.0));
        assert_eq!(ctx.video.as_ref().unwrap().pts, Some(1.0));
    }

    #[test]
    fn test_large_pts_decrease_resets_timing() {
        let mut ctx = video_context(PlaybackOptions::default(), &[10.0, 2.0, 2.04]);
        take_frame(&mut ctx);
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(0.0));
        assert_eq!(ctx.video.as_ref().unwrap().pts, Some(2.0));
        assert!(matches!(take_frame(&mut ctx), VideoUpdate::Frame(ft) if (ft - 0.04).abs() < 1e-9));
    }

    #[test]
    fn test_decreasing_threshold_is_configurable() {
        let opts = PlaybackOptions {
            decreasing_pts_threshold: 0.01,
            ..Default::default()
        };
        let mut ctx = video_context(opts, &[1.0, 0.96]);
        take_frame(&mut ctx);
        take_frame(&mut ctx);
        assert_eq!(ctx.video.as_ref().unwrap().pts, Some(0.96));
    }

    #[test]
    fn test_hrseek_skips_frames_before_target() {
        let pts: Vec<f64> = (0..10).map(|i| i as f64 * 0.04).collect();
        let mut ctx = video_context(PlaybackOptions::default(), &pts);
        ctx.state.hrseek_active = true;
        ctx.state.hrseek_framedrop = true;
        ctx.state.hrseek_pts = 0.2;
        let mut shown = None;
        for _ in 0..20 {
            if let VideoUpdate::Frame(_) = ctx.update_video() {
                shown = ctx.vo.as_ref().unwrap().next_pts();
                break;
            }
        }
        let shown = shown.unwrap();
        assert!((shown - 0.2).abs() < 1e-9, "shown = {}", shown);
        assert!(!ctx.state.hrseek_active);
        assert!(!ctx.state.hrseek_framedrop);
    }

    #[test]
    fn test_nocorrect_pts_uses_nominal_frame_time() {
        let opts = PlaybackOptions {
            correct_pts: false,
            ..Default::default()
        };
        let mut ctx = video_context(opts, &[0.0, 0.5, 0.51]);
        ctx.state.restart_playback = false;
        let ft = ctx.video.as_ref().unwrap().frame_time;
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(ft));
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(ft));
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Frame(ft));
        assert_eq!(take_frame(&mut ctx), VideoUpdate::Eof);
    }
}
