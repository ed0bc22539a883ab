use crate::core::{
    Chapter, PlaybackClock, PlaybackOptions, PlaybackStatus, PlayerError, Result, SeekKind,
    SeekPrecision, SeekRequest, StopReason, StreamType, TimeSource, Track, TrackId,
};
use crate::player::audio_sync::AudioChain;
use crate::player::log_ctx;
use crate::player::subtitles::SubtitleChain;
use crate::player::video_pump::VideoChain;
use crate::player::{AudioOutput, CommandSource, DemuxerSource, MediaBackend, Timeline, VideoOutput};
use log::{debug, info, warn};
use std::sync::Arc;

/// 播放同步状态
///
/// 每次迭代都会修改，seek 时大部分字段被重置
#[derive(Debug, Clone)]
pub struct SyncState {
    pub paused: bool,
    /// 逐帧播放剩余的帧数
    pub step_frames: u32,
    /// 刚打开或刚 seek，还没显示第一帧
    pub restart_playback: bool,
    /// 音频需要重新对齐到视频位置
    pub syncing_audio: bool,
    pub stop_reason: StopReason,
    /// 已写给音频设备、领先于视频的音频时长（秒）
    pub delay: f64,
    /// 距离下一帧应当显示还有多久（秒）
    pub time_frame: f64,
    /// 最近显示的视频帧时间戳
    pub video_pts: Option<f64>,
    /// 最近一次 flip 的帧时间戳（keep-open 时用来刷新画面）
    pub last_vo_pts: Option<f64>,
    /// 当前播放位置（显示的视频帧，纯音频时为正在播放的音频）
    pub playback_pts: Option<f64>,
    /// 最近一次绝对 seek 的目标，新帧显示前用作当前位置
    pub last_seek_pts: Option<f64>,
    /// 期望的音视频时间差（用户设置 + 流声明）
    pub audio_delay: f64,
    /// 同步修正累计量（仅用于显示）
    pub total_avsync_change: f64,
    pub drop_frame_count: u64,
    pub dropped_frames_in_a_row: u32,
    pub last_av_difference: Option<f64>,
    pub last_flip_duration: f64,
    pub hrseek_active: bool,
    /// 精确 seek 到达目标前，解码但不显示
    pub hrseek_framedrop: bool,
    pub hrseek_pts: f64,
    /// 时间线片段的时间偏移：片段起点 - 源内起点
    pub video_offset: f64,
    /// 最近一次 seek 的时刻（单调时钟秒）
    pub start_timestamp: f64,
    /// -2 表示没有按章节 seek
    pub last_chapter_seek: i32,
    pub last_chapter_pts: f64,
    pub drop_message_shown: bool,
    /// 还能显示的帧数，None 表示不限
    pub max_frames: Option<i64>,
    /// 上一次命令等待的时长
    pub last_sleep_time: f64,
}

impl SyncState {
    pub fn new(opts: &PlaybackOptions) -> Self {
        Self {
            paused: false,
            step_frames: 0,
            restart_playback: true,
            syncing_audio: false,
            stop_reason: StopReason::KeepPlaying,
            delay: 0.0,
            time_frame: 0.0,
            video_pts: None,
            last_vo_pts: None,
            playback_pts: None,
            last_seek_pts: None,
            audio_delay: opts.audio_delay,
            total_avsync_change: 0.0,
            drop_frame_count: 0,
            dropped_frames_in_a_row: 0,
            last_av_difference: None,
            last_flip_duration: 0.0,
            hrseek_active: false,
            hrseek_framedrop: false,
            hrseek_pts: 0.0,
            video_offset: 0.0,
            start_timestamp: 0.0,
            last_chapter_seek: -2,
            last_chapter_pts: 0.0,
            drop_message_shown: false,
            max_frames: opts.max_frames,
            last_sleep_time: 0.0,
        }
    }
}

/// 一个文件的播放上下文
///
/// 由播放循环独占；各子系统以 Option 持有，存在即表示已初始化，drop 即释放
pub struct PlaybackContext {
    pub(crate) opts: PlaybackOptions,
    pub(crate) state: SyncState,
    pub(crate) seek: SeekRequest,
    pub(crate) clock: PlaybackClock,
    /// 第 0 个是主数据源，其余是外部音轨/字幕文件或时间线的其他来源
    pub(crate) sources: Vec<Box<dyn DemuxerSource>>,
    /// 当前主 demuxer 在 `sources` 里的索引
    pub(crate) demuxer: usize,
    pub(crate) timeline: Option<Timeline>,
    pub(crate) chapters: Vec<Chapter>,
    pub(crate) tracks: Vec<Track>,
    pub(crate) current_track: [Option<TrackId>; 3],
    pub(crate) audio: Option<AudioChain>,
    /// 时间线片段切换时留下的音频输出（gapless_audio），等待新链路接手
    pub(crate) gapless_ao: Option<Box<dyn AudioOutput>>,
    pub(crate) video: Option<VideoChain>,
    pub(crate) vo: Option<Box<dyn VideoOutput>>,
    pub(crate) subs: Option<SubtitleChain>,
    pub(crate) backend: Box<dyn MediaBackend>,
    pub(crate) input: Box<dyn CommandSource>,
    loaded: bool,
}

impl PlaybackContext {
    /// 创建播放上下文
    ///
    /// `sources[0]` 是主文件，其余是外部文件（音轨、字幕）
    pub fn new(
        opts: PlaybackOptions,
        sources: Vec<Box<dyn DemuxerSource>>,
        backend: Box<dyn MediaBackend>,
        input: Box<dyn CommandSource>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(PlayerError::NoSource);
        }
        info!(
            "{} 🎮 创建播放上下文: {} 个数据源, 主源 {}",
            log_ctx(),
            sources.len(),
            sources[0].description()
        );
        let state = SyncState::new(&opts);
        Ok(Self {
            opts,
            state,
            seek: SeekRequest::default(),
            clock: PlaybackClock::new(time),
            sources,
            demuxer: 0,
            timeline: None,
            chapters: Vec::new(),
            tracks: Vec::new(),
            current_track: [None; 3],
            audio: None,
            gapless_ao: None,
            video: None,
            vo: None,
            subs: None,
            backend,
            input,
            loaded: false,
        })
    }

    /// 设置多来源时间线（必须在开始播放前调用）
    pub fn set_timeline(&mut self, timeline: Timeline) -> Result<()> {
        if let Some(bad) = timeline.parts().iter().find(|p| p.source >= self.sources.len()) {
            return Err(PlayerError::Other(format!(
                "时间线片段引用了不存在的数据源 {}",
                bad.source
            )));
        }
        self.timeline = Some(timeline);
        Ok(())
    }

    /// 收集轨道、选轨并初始化各条链路
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;

        if let Some(first) = self.timeline.as_ref().and_then(|tl| tl.parts().first().copied()) {
            self.demuxer = first.source;
            self.state.video_offset = first.start - first.source_start;
        }
        self.collect_tracks();
        self.chapters = match &self.timeline {
            Some(tl) if !tl.chapters().is_empty() => tl.chapters().to_vec(),
            _ => self.sources[self.demuxer].chapters(),
        };

        for stream in StreamType::ALL {
            self.current_track[stream.index()] = self.select_track(stream);
        }
        for stream in StreamType::ALL {
            self.preselect_demux_stream(stream);
        }

        self.reinit_video_chain();
        self.reinit_audio_chain();
        self.reinit_subs();

        if self.video.is_none() && self.audio.is_none() {
            warn!("{} ❌ 没有可播放的音频或视频", log_ctx());
            self.state.stop_reason = StopReason::NextEntry;
            return Err(PlayerError::TrackError("没有可播放的音频或视频".to_string()));
        }

        if let Some(start) = self.opts.play_start {
            self.queue_seek(SeekKind::Absolute, start, SeekPrecision::Default);
            let req = std::mem::take(&mut self.seek);
            if let Err(e) = self.execute_seek(req, false) {
                warn!("{} ⚠️  跳到起始位置 {:.3}s 失败: {}", log_ctx(), start, e);
            }
        }
        if self.state.max_frames == Some(0) {
            self.state.stop_reason = StopReason::NextEntry;
        }
        info!(
            "{} ✅ 加载完成: 视频 {:?}, 音频 {:?}, 字幕 {:?}, 时长 {:?}",
            log_ctx(),
            self.current_track[StreamType::Video.index()],
            self.current_track[StreamType::Audio.index()],
            self.current_track[StreamType::Subtitle.index()],
            self.time_length()
        );
        Ok(())
    }

    /// 主数据源（时间线上则为当前片段的来源）的轨道编号为内部流；外部文件的轨道标记来源
    fn collect_tracks(&mut self) {
        let mut next_id = [1u32; 3];
        let mut tracks = Vec::new();
        let main = self.demuxer;
        let timeline_sources: Vec<usize> = self
            .timeline
            .as_ref()
            .map(|tl| tl.parts().iter().map(|p| p.source).collect())
            .unwrap_or_default();
        for (idx, source) in self.sources.iter().enumerate() {
            if idx != main && timeline_sources.contains(&idx) {
                continue;
            }
            for mut track in source.tracks() {
                let slot = track.stream_type.index();
                track.id = TrackId(next_id[slot]);
                next_id[slot] += 1;
                track.external_source = if idx == main { None } else { Some(idx) };
                debug!(
                    "{} 📎 轨道 {} #{}: lang={:?} default={} external={}",
                    log_ctx(),
                    track.stream_type.as_str(),
                    track.id.0,
                    track.lang,
                    track.default_track,
                    track.is_external()
                );
                tracks.push(track);
            }
        }
        self.tracks = tracks;
    }

    /// 轨道所在的数据源索引
    pub(crate) fn source_of(&self, track: &Track) -> usize {
        track.external_source.unwrap_or(self.demuxer)
    }

    pub(crate) fn track(&self, stream: StreamType, id: TrackId) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| t.stream_type == stream && t.id == id)
    }

    pub(crate) fn current_track_info(&self, stream: StreamType) -> Option<Track> {
        self.current_track[stream.index()].and_then(|id| self.track(stream, id).cloned())
    }

    pub fn options(&self) -> &PlaybackOptions {
        &self.opts
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_track(&self, stream: StreamType) -> Option<TrackId> {
        self.current_track[stream.index()]
    }

    pub fn stop_reason(&self) -> StopReason {
        self.state.stop_reason
    }

    pub fn pending_seek(&self) -> SeekRequest {
        self.seek
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// 外部请求停止
    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.state.stop_reason = reason;
    }

    /// 当前状态快照（仅用于显示）
    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            stop_reason: self.state.stop_reason,
            paused: self.state.paused,
            position: Some(self.current_time()),
            duration: self.time_length(),
            av_difference: self.state.last_av_difference,
            total_avsync_change: self.state.total_avsync_change,
            drop_frame_count: self.state.drop_frame_count,
        }
    }

    /// 暂停：两个输出都暂停，剩余帧时间冻结
    pub fn pause_player(&mut self) {
        if self.state.paused {
            return;
        }
        self.state.paused = true;
        self.state.step_frames = 0;
        self.state.time_frame -= self.clock.elapsed_since_last_sample();

        if self.video.is_some() {
            if let Some(vo) = self.vo.as_mut() {
                vo.pause();
            }
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.ao.pause();
        }
        info!("{} ⏸️  暂停 @ {:.3}s", log_ctx(), self.current_time());
    }

    /// 继续播放：暂停期间流逝的时间不计入帧时间
    pub fn unpause_player(&mut self) {
        if !self.state.paused {
            return;
        }
        self.state.paused = false;

        if let Some(audio) = self.audio.as_mut() {
            audio.ao.resume();
        }
        if self.video.is_some() && self.state.step_frames == 0 {
            if let Some(vo) = self.vo.as_mut() {
                vo.resume();
            }
        }
        self.clock.elapsed_since_last_sample();
        info!("{} ▶️  继续播放", log_ctx());
    }

    /// 逐帧：临时继续播放一帧，显示后重新暂停
    pub fn add_step_frame(&mut self) {
        self.state.step_frames += 1;
        if self.video.is_some() {
            if let Some(vo) = self.vo.as_mut() {
                vo.pause();
            }
        }
        self.unpause_player();
    }

    /// 两次循环之间最长的等待时间
    pub(crate) fn wakeup_period(&self) -> f64 {
        let mut period = self.opts.wakeup_period;
        if let Some(vo_period) = self.vo.as_ref().and_then(|vo| vo.wakeup_period()) {
            if vo_period > 0.0 {
                period = period.min(vo_period);
            }
        }
        period
    }
}
