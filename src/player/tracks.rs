//! 选轨和切轨
//!
//! 每种流类型最多一个当前轨道。切换时先拆掉对应链路，再按新轨道重建；
//! 重建失败的链路会被关闭，播放继续使用剩下的流。

use crate::core::{StopReason, StreamType, Track, TrackId, TrackSelection};
use crate::player::audio_sync::AudioChain;
use crate::player::subtitles::SubtitleChain;
use crate::player::video_pump::VideoChain;
use crate::player::{log_ctx, PlaybackContext};
use log::{error, info, warn};
use std::cmp::Ordering;

/// 语言匹配分数：越靠前的偏好语言分数越高，不匹配为 0
fn match_lang(langs: &[String], lang: Option<&str>) -> usize {
    let Some(lang) = lang else {
        return 0;
    };
    langs
        .iter()
        .position(|l| l.eq_ignore_ascii_case(lang))
        .map_or(0, |i| langs.len() - i)
}

/// `a` 是否比 `b` 更合适
fn prefer(a: &Track, b: &Track, langs: &[String]) -> bool {
    if a.is_external() != b.is_external() {
        return a.is_external();
    }
    let (la, lb) = (
        match_lang(langs, a.lang.as_deref()),
        match_lang(langs, b.lang.as_deref()),
    );
    if la != lb {
        return la > lb;
    }
    if a.default_track != b.default_track {
        return a.default_track;
    }
    if a.attached_picture != b.attached_picture {
        return !a.attached_picture;
    }
    a.id.cmp(&b.id) != Ordering::Greater
}

/// 按用户选择和偏好挑一个轨道
///
/// 指定编号的轨道直接选中。音视频总会选一个；字幕只有外部文件、
/// 语言匹配或标记为默认时才自动选
pub fn select_track(
    tracks: &[Track],
    stream: StreamType,
    selection: TrackSelection,
    langs: &[String],
    audio_display: bool,
) -> Option<TrackId> {
    if selection == TrackSelection::Off {
        return None;
    }
    let mut pick: Option<&Track> = None;
    for track in tracks.iter().filter(|t| t.stream_type == stream) {
        if selection == TrackSelection::Id(track.id.0) {
            return Some(track.id);
        }
        if pick.map_or(true, |p| prefer(track, p, langs)) {
            pick = Some(track);
        }
    }
    let pick = pick?;
    let fallback = matches!(stream, StreamType::Video | StreamType::Audio);
    if !fallback
        && !pick.is_external()
        && match_lang(langs, pick.lang.as_deref()) == 0
        && !pick.default_track
    {
        return None;
    }
    if pick.attached_picture && !audio_display {
        return None;
    }
    Some(pick.id)
}

impl PlaybackContext {
    pub(crate) fn select_track(&self, stream: StreamType) -> Option<TrackId> {
        let (selection, langs): (TrackSelection, &[String]) = match stream {
            StreamType::Video => (self.opts.video_id, &[]),
            StreamType::Audio => (self.opts.audio_id, self.opts.audio_lang.as_slice()),
            StreamType::Subtitle => (self.opts.sub_id, self.opts.sub_lang.as_slice()),
        };
        select_track(&self.tracks, stream, selection, langs, self.opts.audio_display)
    }

    /// 让各数据源只输出当前选中的流
    pub(crate) fn preselect_demux_stream(&mut self, stream: StreamType) {
        let target = self
            .current_track_info(stream)
            .map(|t| (self.source_of(&t), t.demuxer_id));
        for (idx, source) in self.sources.iter_mut().enumerate() {
            let id = match target {
                Some((src, demuxer_id)) if src == idx => Some(demuxer_id),
                _ => None,
            };
            source.select_stream(stream, id);
        }
    }

    /// 按当前视频轨道重建视频链路，返回是否成功
    pub(crate) fn reinit_video_chain(&mut self) -> bool {
        let Some(track) = self.current_track_info(StreamType::Video) else {
            self.video = None;
            self.vo = None;
            info!("{} 📴 没有视频", log_ctx());
            return false;
        };
        self.preselect_demux_stream(StreamType::Video);
        let source = self.source_of(&track);

        if !self.opts.fixed_vo || self.vo.is_none() {
            match self.backend.open_video_output() {
                Ok(vo) => self.vo = Some(vo),
                Err(e) => {
                    error!("{} ❌ 无法打开视频输出: {}", log_ctx(), e);
                    self.abandon_video();
                    return false;
                }
            }
        }
        match VideoChain::open(&track, source, self.backend.as_mut()) {
            Ok(chain) => self.video = Some(chain),
            Err(e) => {
                error!("{} ❌ 无法打开视频解码器: {}", log_ctx(), e);
                self.abandon_video();
                return false;
            }
        }
        self.state.restart_playback = true;
        self.state.delay = 0.0;
        self.state.last_av_difference = None;
        true
    }

    /// 视频链路初始化失败：关闭视频，继续播放其他流
    pub(crate) fn abandon_video(&mut self) {
        self.video = None;
        if !self.opts.fixed_vo {
            self.vo = None;
        }
        self.current_track[StreamType::Video.index()] = None;
        self.preselect_demux_stream(StreamType::Video);
        if self.current_track[StreamType::Audio.index()].is_none() {
            self.state.stop_reason = StopReason::NextEntry;
        }
    }

    /// 按当前音频轨道重建音频链路；已有链路时（格式变化）只重开输出设备
    pub(crate) fn reinit_audio_chain(&mut self) -> bool {
        let kept = self.gapless_ao.take();
        let Some(track) = self.current_track_info(StreamType::Audio) else {
            self.audio = None;
            return false;
        };
        self.preselect_demux_stream(StreamType::Audio);
        let source = self.source_of(&track);
        let opened = match self.audio.take() {
            Some(chain) if chain.track == track.id => chain.reopen_output(self.backend.as_mut()),
            _ => AudioChain::open(&track, source, self.backend.as_mut(), kept),
        };
        match opened {
            Ok(chain) => {
                self.audio = Some(chain);
                self.state.syncing_audio = true;
                true
            }
            Err(e) => {
                self.drop_audio_chain(&e.to_string());
                false
            }
        }
    }

    /// 按当前字幕轨道重建字幕链路；失败只记录警告
    pub(crate) fn reinit_subs(&mut self) -> bool {
        self.subs = None;
        let Some(track) = self.current_track_info(StreamType::Subtitle) else {
            return false;
        };
        self.preselect_demux_stream(StreamType::Subtitle);
        let source = self.source_of(&track);
        match self.backend.open_subtitle_decoder(&track) {
            Ok(decoder) => {
                self.subs = Some(SubtitleChain::new(track.id, source, decoder));
                true
            }
            Err(e) => {
                warn!("{} ⚠️  无法打开字幕解码器: {}", log_ctx(), e);
                false
            }
        }
    }

    /// 切换到指定轨道（None 表示关闭该类型），并记住这个选择
    pub fn switch_track(&mut self, stream: StreamType, track: Option<TrackId>) {
        let slot = stream.index();
        if self.current_track[slot] == track {
            return;
        }
        if let Some(id) = track {
            if self.track(stream, id).is_none() {
                warn!("{} ⚠️  不存在的{}轨道 #{}", log_ctx(), stream.as_str(), id.0);
                return;
            }
        }
        info!(
            "{} 🔀 切换{}轨道: {:?} -> {:?}",
            log_ctx(),
            stream.as_str(),
            self.current_track[slot],
            track
        );
        match stream {
            StreamType::Video => {
                self.video = None;
                if !(self.opts.fixed_vo && track.is_some()) {
                    self.vo = None;
                }
            }
            StreamType::Audio => self.audio = None,
            StreamType::Subtitle => self.subs = None,
        }

        self.current_track[slot] = track;
        let selection = track.map_or(TrackSelection::Off, |id| TrackSelection::Id(id.0));
        match stream {
            StreamType::Video => {
                self.opts.video_id = selection;
                self.reinit_video_chain();
            }
            StreamType::Audio => {
                self.opts.audio_id = selection;
                self.reinit_audio_chain();
            }
            StreamType::Subtitle => {
                self.opts.sub_id = selection;
                self.reinit_subs();
            }
        }
        self.preselect_demux_stream(stream);
    }

    /// 切到下一个轨道，最后一个之后是关闭
    pub fn cycle_track(&mut self, stream: StreamType) {
        let mut ids: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|t| t.stream_type == stream)
            .map(|t| t.id)
            .collect();
        ids.sort();
        let next = match self.current_track[stream.index()] {
            None => ids.first().copied(),
            Some(cur) => ids.iter().copied().find(|&id| id > cur),
        };
        self.switch_track(stream, next);
    }
}
