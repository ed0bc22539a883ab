//! 播放循环
//!
//! 单线程协作式调度：每次迭代先喂音频，再准备和显示视频，
//! 然后判断是否播完、处理命令、最后执行排队的 seek。
//! 唯一的阻塞点是命令源的 `wait`，超时时间每次迭代重新计算。

use crate::core::{SeekKind, SeekPrecision, SeekRequest, StopReason};
use crate::player::audio_sync::AudioFill;
use crate::player::video_pump::VideoUpdate;
use crate::player::{log_ctx, PlaybackContext};
use log::{debug, error, info, trace, warn};

/// 播完判断时允许设备里还剩的音频（秒）
const EOF_AUDIO_MARGIN: f64 = 0.05;

/// 落后超过这个值（秒）不再加速追赶，从当前帧重新计时
const MAX_CATCHUP: f64 = 0.2;

/// 距离下一帧超过这个值（秒）就先去等命令
const EARLY_WAKEUP: f64 = 0.050;
const EARLY_WAKEUP_MARGIN: f64 = 0.040;

/// seek 后这段时间（秒）内不接受新的 seek，先让画面出来
const SEEK_COOLDOWN: f64 = 0.3;

impl PlaybackContext {
    /// 播放循环的一次迭代
    pub fn run_playloop(&mut self) {
        let speed = self.opts.playback_speed;
        let mut full_audio_buffers = false;
        let mut audio_left = false;
        let mut video_left = false;
        let mut endpts = self.play_end_pts();
        let mut end_is_chapter = false;
        let mut sleeptime = self.wakeup_period();
        let was_restart = self.state.restart_playback;
        let mut new_frame_shown = false;

        if let Some(tl) = &self.timeline {
            let end = tl.part_end(tl.current());
            if endpts.map_or(true, |e| end < e) {
                endpts = Some(end);
                end_is_chapter = true;
            }
        }

        let ao_untimed = self.audio.as_ref().map_or(false, |a| a.ao.is_untimed());
        if self.audio.is_some() && !self.state.restart_playback && !ao_untimed {
            let status = self.fill_audio_out_buffers(endpts);
            full_audio_buffers = status == AudioFill::Full;
            audio_left = status != AudioFill::Eof;
        }

        let mut buffered_audio: Option<f64> = None;
        'video: {
            if self.video.is_none() {
                break 'video;
            }
            let loaded = self.vo.as_ref().map_or(false, |vo| vo.has_buffered_frame());
            video_left = loaded || self.vo.as_ref().map_or(false, |vo| vo.has_frame());
            if !loaded && (!self.state.paused || self.state.restart_playback) {
                match self.update_video() {
                    VideoUpdate::InitFailed => {
                        error!("{} ❌ 视频输出初始化失败，关闭视频", log_ctx());
                        self.abandon_video();
                        video_left = false;
                        break 'video;
                    }
                    VideoUpdate::Frame(frame_time) => {
                        trace!("🎞️  帧时长 {:.3}", frame_time);
                        video_left = true;
                        if !self.state.restart_playback {
                            self.state.time_frame += frame_time / speed;
                            self.adjust_sync(frame_time);
                        }
                    }
                    VideoUpdate::Pending => video_left = true,
                    VideoUpdate::Eof => {
                        video_left = false;
                        self.state.delay = 0.0;
                        self.state.last_av_difference = Some(0.0);
                    }
                }
            }

            if let (Some(end), Some(chain)) = (endpts, self.video.as_ref()) {
                video_left &= chain.pts.map_or(true, |pts| pts < end);
            }

            if !video_left || (self.state.paused && !self.state.restart_playback) {
                break 'video;
            }
            let Some(vo) = self.vo.as_mut() else {
                break 'video;
            };
            if !vo.has_buffered_frame() {
                sleeptime = 0.0;
                break 'video;
            }

            self.state.time_frame -= self.clock.elapsed_since_last_sample();
            if full_audio_buffers && !self.state.restart_playback {
                let mut ba = self.audio.as_ref().map_or(0.0, |a| a.ao.get_delay());
                if self.opts.autosync > 0 {
                    // 用预测值平滑设备报告的延迟
                    let predicted = self.state.delay / speed + self.state.time_frame;
                    let difference = ba - predicted;
                    ba = predicted + difference / self.opts.autosync as f64;
                }
                buffered_audio = Some(ba);
                self.state.time_frame = ba - self.state.delay / speed;
            } else if self.state.time_frame < -MAX_CATCHUP || self.opts.untimed || vo.is_untimed() {
                self.state.time_frame = 0.0;
            }

            let offset = vo.flip_queue_offset();
            let vsleep = self.state.time_frame - offset;
            if vsleep > EARLY_WAKEUP {
                sleeptime = sleeptime.min(vsleep - EARLY_WAKEUP_MARGIN);
                break 'video;
            }
            sleeptime = 0.0;

            // 显示这一帧
            let pts = self.video.as_ref().and_then(|v| v.pts);
            self.state.video_pts = pts;
            self.state.last_vo_pts = pts;
            self.state.playback_pts = pts;
            self.update_subtitles(pts);

            self.state.time_frame -= self.clock.elapsed_since_last_sample();
            self.state.time_frame -= offset;
            if self.state.time_frame > 0.001 {
                self.state.time_frame = self.clock.timing_sleep(self.state.time_frame, self.opts.softsleep);
            }
            self.state.time_frame += offset;

            let time_frame = self.state.time_frame.max(-1.0);
            let target_us = ((self.clock.last_sample() + time_frame) * 1e6) as i64;
            let Some(vo) = self.vo.as_mut() else {
                break 'video;
            };
            self.state.last_flip_duration = vo.flip(target_us);
            if vo.flip_is_timed() {
                self.state.last_flip_duration = 0.0;
                self.state.time_frame -= self.clock.elapsed_since_last_sample();
            }
            if self.state.restart_playback {
                self.state.syncing_audio = true;
                if self.audio.is_some() {
                    self.fill_audio_out_buffers(endpts);
                }
                self.state.restart_playback = false;
                self.state.time_frame = 0.0;
                self.clock.elapsed_since_last_sample();
            }
            self.update_avsync();
            new_frame_shown = true;
        }

        let ao_untimed = self.audio.as_ref().map_or(false, |a| a.ao.is_untimed());
        if self.audio.is_some()
            && (if self.state.restart_playback {
                !video_left
            } else {
                ao_untimed && (self.state.delay <= 0.0 || !video_left)
            })
        {
            let status = self.fill_audio_out_buffers(endpts);
            full_audio_buffers = status == AudioFill::Full && !ao_untimed;
            audio_left = status != AudioFill::Eof;
        }
        if !video_left {
            self.state.restart_playback = false;
        }
        if let Some(audio) = self.audio.as_ref() {
            if buffered_audio.is_none() {
                buffered_audio = Some(if self.state.paused { 0.0 } else { audio.ao.get_delay() });
            }
        }

        if !video_left && (!self.state.paused || was_restart) {
            if self.audio.is_some() {
                let ba = buffered_audio.unwrap_or(0.0);
                let a_pos = self.written_audio_pts().map(|w| w - speed * ba);
                self.state.playback_pts = a_pos;
                if self.video.is_none() {
                    self.update_subtitles(a_pos);
                }
            }
        }

        // 音视频都被关掉时不结束，等用户重新打开
        let ba = buffered_audio.unwrap_or(-1.0);
        if (self.audio.is_some() || self.video.is_some())
            && !audio_left
            && !video_left
            && (self.opts.gapless_audio || ba < EOF_AUDIO_MARGIN)
            && (!self.state.paused || was_restart)
        {
            let next_part = self
                .timeline
                .as_ref()
                .map(|tl| tl.part_end(tl.current()));
            match next_part {
                Some(start) if end_is_chapter => {
                    debug!("{} 🧩 片段结束，进入 {:.3}s", log_ctx(), start);
                    if let Err(e) = self.execute_seek(SeekRequest::absolute(start), true) {
                        debug!("🧩 时间线结束: {}", e);
                    }
                }
                _ => self.state.stop_reason = StopReason::AtEndOfFile,
            }
            sleeptime = 0.0;
        }

        if !self.state.stop_reason.is_stopping() && !self.state.restart_playback {
            // 没有视频时一次迭代算一帧
            if !video_left {
                new_frame_shown = true;
            }
            if let Some(max_frames) = self.state.max_frames.as_mut() {
                if new_frame_shown {
                    *max_frames -= 1;
                }
                if *max_frames <= 0 {
                    self.state.stop_reason = StopReason::NextEntry;
                }
            }
            if self.state.step_frames > 0 && !self.state.paused {
                if new_frame_shown {
                    self.state.step_frames -= 1;
                }
                if self.state.step_frames == 0 {
                    self.pause_player();
                }
            }
        }

        if !self.state.stop_reason.is_stopping() {
            let mut audio_sleep = 9.0;
            if self.audio.is_some() && !self.state.paused {
                if ao_untimed {
                    if !video_left {
                        audio_sleep = 0.0;
                    }
                } else if full_audio_buffers {
                    audio_sleep = ba - 0.050;
                    // 缓冲很大时多留一些余量
                    audio_sleep = if audio_sleep > 0.100 {
                        (audio_sleep - 0.200).max(0.100)
                    } else {
                        audio_sleep.max(0.020)
                    };
                } else {
                    audio_sleep = 0.020;
                }
            }
            sleeptime = sleeptime.min(audio_sleep);
            if sleeptime > 0.0 && self.video.is_some() {
                let want_redraw = self.vo.as_mut().map_or(false, |vo| vo.wants_redraw());
                if want_redraw {
                    let redrawn = self.vo.as_mut().map_or(false, |vo| vo.redraw());
                    if redrawn {
                        sleeptime = 0.0;
                    } else if self.state.paused && video_left {
                        // 不支持重绘时逐帧播放一帧来刷新画面
                        self.add_step_frame();
                        sleeptime = 0.0;
                    }
                }
            }
            if sleeptime > 0.0 {
                self.input.wait(sleeptime);
            }
            self.state.last_sleep_time = sleeptime;
        }

        // 先执行普通命令；连续的 seek 合并后放到最后执行
        loop {
            let Some(cmd) = self.input.peek() else {
                break;
            };
            let is_seek = cmd.is_seek();
            if (self.seek.is_pending() && !is_seek)
                || (self.state.restart_playback
                    && is_seek
                    && self.clock.now() - self.state.start_timestamp < SEEK_COOLDOWN)
            {
                break;
            }
            let Some(cmd) = self.input.take() else {
                break;
            };
            self.run_command(cmd);
            if self.state.stop_reason.is_stopping() {
                break;
            }
        }

        if self.opts.step_sec > 0.0
            && !self.state.stop_reason.is_stopping()
            && !self.state.paused
            && !self.state.restart_playback
        {
            self.queue_seek(SeekKind::Relative, self.opts.step_sec, SeekPrecision::Default);
        }

        if self.opts.keep_open && self.state.stop_reason == StopReason::AtEndOfFile {
            self.state.stop_reason = StopReason::KeepPlaying;
            self.pause_player();
            if self.vo.as_ref().map_or(false, |vo| !vo.has_frame()) {
                // 画面还是空的，跳回最后位置刷一帧
                let target = self.state.last_vo_pts.unwrap_or(0.0);
                self.queue_seek(SeekKind::Absolute, target, SeekPrecision::Exact);
            }
        }

        if self.seek.is_pending() {
            let req = std::mem::take(&mut self.seek);
            if let Err(e) = self.execute_seek(req, false) {
                warn!("{} ⚠️  seek 失败: {}", log_ctx(), e);
            }
        }
    }

    /// 播放当前文件直到需要停止，返回停止原因
    pub fn play_file(&mut self) -> StopReason {
        if let Err(e) = self.load() {
            error!("{} ❌ 加载失败: {}", log_ctx(), e);
            if !self.state.stop_reason.is_stopping() {
                self.state.stop_reason = StopReason::NextEntry;
            }
            return self.state.stop_reason;
        }
        info!("{} ▶️  开始播放", log_ctx());
        while !self.state.stop_reason.is_stopping() {
            self.run_playloop();
        }
        let status = self.status();
        info!(
            "{} ⏹️  播放结束: {:?} @ {:.3}s, 丢帧 {}, 同步修正累计 {:.3}s",
            log_ctx(),
            status.stop_reason,
            status.position.unwrap_or(0.0),
            status.drop_frame_count,
            status.total_avsync_change
        );
        status.stop_reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AudioFormat, ManualTimeSource, PlaybackOptions, PlayerCommand, SampleFormat, StreamType,
        TimeSource, TrackId,
    };
    use crate::player::synthetic::{ScriptedCommandSource, SyntheticBackend, SyntheticDemuxer};
    use crate::player::{DemuxerSource, Timeline, TimelinePart};
    use std::sync::Arc;

    fn build(
        opts: PlaybackOptions,
        sources: Vec<Box<dyn DemuxerSource>>,
        backend: SyntheticBackend,
        input: ScriptedCommandSource,
        time: Arc<ManualTimeSource>,
    ) -> PlaybackContext {
        PlaybackContext::new(opts, sources, Box::new(backend), Box::new(input), time).unwrap()
    }

    fn pcm() -> AudioFormat {
        AudioFormat::new(8000, 2, SampleFormat::I16)
    }

    #[test]
    fn test_video_only_frames_flip_on_schedule() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video(25.0, 3);
        let backend = SyntheticBackend::new(time.clone());
        let flips = backend.flips();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );

        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
        let flips = flips.lock();
        assert_eq!(flips.len(), 3);
        for (i, flip) in flips.iter().enumerate() {
            let expected = i as f64 * 0.04;
            assert!((flip.pts - expected).abs() < 1e-9, "pts {}", flip.pts);
            assert!((flip.at - expected).abs() < 1e-6, "flip {} at {}", i, flip.at);
        }
        assert_eq!(ctx.state.drop_frame_count, 0);
    }

    #[test]
    fn test_fast_audio_timestamps_drive_bounded_correction() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video(2.0, 8)
            .with_audio(pcm(), 4.0, 0.1)
            .with_audio_pts_scale(1.2);
        let backend = SyntheticBackend::new(time.clone()).audio_capacity(0.5);
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        ctx.load().unwrap();

        let mut last_total = 0.0;
        let mut iterations = 0;
        while !ctx.stop_reason().is_stopping() && iterations < 5000 {
            ctx.run_playloop();
            let total = ctx.state.total_avsync_change;
            assert!(total >= last_total - 1e-12, "{} < {}", total, last_total);
            // 帧时长 0.5s，单次修正不超过 0.05s
            assert!(total - last_total <= 0.05 + 1e-9);
            last_total = total;
            iterations += 1;
        }
        assert_eq!(ctx.stop_reason(), StopReason::AtEndOfFile);
        assert!(last_total > 0.0);
    }

    #[test]
    fn test_audio_only_plays_to_end() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(pcm(), 1.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time.clone(),
        );
        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
        // 播完时设备里剩下的不超过 50ms
        assert!(time.now() >= 0.95, "now = {}", time.now());
        let pos = ctx.current_time();
        assert!(pos > 0.9 && pos <= 1.0 + 1e-9, "pos = {}", pos);
    }

    #[test]
    fn test_video_output_failure_continues_audio_only() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video(25.0, 25)
            .with_audio(pcm(), 1.0, 0.1);
        let backend = SyntheticBackend::new(time.clone()).fail_video_configure();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
        assert!(!ctx.has_video());
        assert!(ctx.has_audio());
        assert!(ctx.current_track(StreamType::Video).is_none());
    }

    #[test]
    fn test_missing_video_output_falls_back_to_audio() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video(25.0, 25)
            .with_audio(pcm(), 0.5, 0.1);
        let backend = SyntheticBackend::new(time.clone()).fail_video_output();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        ctx.load().unwrap();
        assert!(!ctx.has_video());
        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
    }

    #[test]
    fn test_untimed_audio_does_not_wait() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("a").with_audio(pcm(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone()).untimed_audio();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time.clone(),
        );
        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
        assert_eq!(time.now(), 0.0);
    }

    #[test]
    fn test_video_failure_without_audio_moves_on() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video(25.0, 25);
        let backend = SyntheticBackend::new(time.clone()).fail_video_configure();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        assert_eq!(ctx.play_file(), StopReason::NextEntry);
    }

    #[test]
    fn test_switching_to_current_track_is_noop() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("av")
            .with_video(25.0, 50)
            .with_audio(pcm(), 2.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        ctx.load().unwrap();
        for _ in 0..10 {
            ctx.run_playloop();
        }
        let delay = ctx.state.delay;
        let video_pts = ctx.state.video_pts;
        let restart = ctx.state.restart_playback;
        ctx.switch_track(StreamType::Audio, Some(TrackId(1)));
        ctx.switch_track(StreamType::Video, Some(TrackId(1)));
        assert_eq!(ctx.state.delay, delay);
        assert_eq!(ctx.state.video_pts, video_pts);
        assert_eq!(ctx.state.restart_playback, restart);
        assert!(ctx.has_audio() && ctx.has_video());
    }

    #[test]
    fn test_seek_is_executed_after_other_commands() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video(25.0, 250).with_length(10.0);
        let backend = SyntheticBackend::new(time.clone());
        let input = ScriptedCommandSource::new(time.clone())
            .at(0.5, PlayerCommand::Seek {
                kind: SeekKind::Absolute,
                amount: 5.0,
                precision: SeekPrecision::Default,
            })
            .at(0.5, PlayerCommand::CyclePause)
            .at(0.5, PlayerCommand::Quit);
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(demuxer)],
            backend,
            input,
            time,
        );
        ctx.load().unwrap();
        let mut iterations = 0;
        while ctx.state.last_seek_pts.is_none() && iterations < 1000 {
            ctx.run_playloop();
            iterations += 1;
        }
        // seek 挡住了后面的暂停命令
        assert_eq!(ctx.state.last_seek_pts, Some(5.0));
        assert!(!ctx.state.paused);
        assert_eq!(ctx.stop_reason(), StopReason::KeepPlaying);
        while !ctx.stop_reason().is_stopping() && iterations < 2000 {
            ctx.run_playloop();
            iterations += 1;
        }
        assert!(ctx.state.paused);
        assert_eq!(ctx.stop_reason(), StopReason::Quit);
    }

    #[test]
    fn test_max_frames_stops_playback() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video(25.0, 100);
        let backend = SyntheticBackend::new(time.clone());
        let flips = backend.flips();
        let input = ScriptedCommandSource::new(time.clone());
        let opts = PlaybackOptions {
            max_frames: Some(5),
            ..Default::default()
        };
        let mut ctx = build(opts, vec![Box::new(demuxer)], backend, input, time);
        assert_eq!(ctx.play_file(), StopReason::NextEntry);
        assert_eq!(flips.lock().len(), 5);
    }

    #[test]
    fn test_keep_open_pauses_at_end() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("v").with_video(25.0, 5);
        let backend = SyntheticBackend::new(time.clone());
        let input = ScriptedCommandSource::new(time.clone());
        let opts = PlaybackOptions {
            keep_open: true,
            ..Default::default()
        };
        let mut ctx = build(opts, vec![Box::new(demuxer)], backend, input, time);
        ctx.load().unwrap();
        let mut iterations = 0;
        while !ctx.state.paused && iterations < 100 {
            ctx.run_playloop();
            iterations += 1;
        }
        assert!(ctx.state.paused);
        assert_eq!(ctx.stop_reason(), StopReason::KeepPlaying);
        // 暂停后循环继续，只等待命令
        ctx.run_playloop();
        assert_eq!(ctx.stop_reason(), StopReason::KeepPlaying);
        assert!(ctx.state.last_sleep_time > 0.0);
    }

    #[test]
    fn test_timeline_crosses_sources() {
        let time = Arc::new(ManualTimeSource::new());
        let first = SyntheticDemuxer::new("part-a").with_video(25.0, 25);
        let second = SyntheticDemuxer::new("part-b").with_video(25.0, 25);
        let backend = SyntheticBackend::new(time.clone());
        let flips = backend.flips();
        let input = ScriptedCommandSource::new(time.clone());
        let mut ctx = build(
            PlaybackOptions::default(),
            vec![Box::new(first), Box::new(second)],
            backend,
            input,
            time,
        );
        let timeline = Timeline::new(
            vec![TimelinePart::new(0.0, 0.0, 0), TimelinePart::new(1.0, 0.0, 1)],
            2.0,
        )
        .unwrap();
        ctx.set_timeline(timeline).unwrap();
        assert_eq!(ctx.time_length(), Some(2.0));

        assert_eq!(ctx.play_file(), StopReason::AtEndOfFile);
        let flips = flips.lock();
        assert_eq!(flips.len(), 50);
        assert!((flips[25].pts - 1.0).abs() < 1e-9);
        assert!((flips[49].pts - 1.96).abs() < 1e-9);
    }
}
