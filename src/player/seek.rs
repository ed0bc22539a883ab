//! Seek 引擎
//!
//! 用户请求先合并成一个待执行的 [`SeekRequest`]，在一次循环的最后执行。
//! 执行时把请求换算成 demuxer 层的 seek，成功后重置所有下游状态。

use crate::core::options::HrSeekMode;
use crate::core::{PlayerError, Result, SeekKind, SeekPrecision, SeekRequest, StopReason, StreamType};
use crate::player::{log_ctx, PlaybackContext, SeekFlags};
use log::{debug, info, warn};

impl SeekRequest {
    /// 合并一个新的 seek 请求
    ///
    /// 相对 seek 和待执行的相对 seek 相加，和为 0 时清空；已有其他类型的请求时丢弃。
    /// 绝对/比例 seek 直接替换
    ///
    /// 待执行的是绝对 seek 时，相对量不叠加到目标上：丢弃后目标保持用户指定的位置
    pub fn queue(&mut self, kind: SeekKind, amount: f64, precision: SeekPrecision) {
        match kind {
            SeekKind::Relative => {
                match self.kind {
                    SeekKind::None => {
                        *self = SeekRequest {
                            kind,
                            amount,
                            precision,
                            direction: 0,
                        };
                    }
                    SeekKind::Relative => {
                        self.amount += amount;
                        self.precision = self.precision.max(precision);
                    }
                    SeekKind::Absolute | SeekKind::Factor => return,
                }
                if self.amount == 0.0 {
                    *self = SeekRequest::default();
                }
            }
            SeekKind::Absolute | SeekKind::Factor => {
                *self = SeekRequest {
                    kind,
                    amount,
                    precision,
                    direction: 0,
                };
            }
            SeekKind::None => *self = SeekRequest::default(),
        }
    }
}

impl PlaybackContext {
    pub fn queue_seek(&mut self, kind: SeekKind, amount: f64, precision: SeekPrecision) {
        self.seek.queue(kind, amount, precision);
        debug!("⏩ 待执行 seek: {:?}", self.seek);
    }

    /// 执行一次 seek
    ///
    /// `timeline_fallthrough` 表示播放自然走到下一个时间线片段，此时不清空音频设备。
    /// 失败时（例如流不可 seek）播放位置保持不变
    pub fn execute_seek(&mut self, mut req: SeekRequest, timeline_fallthrough: bool) -> Result<()> {
        if !req.is_pending() {
            return Ok(());
        }
        let demuxer = &self.sources[self.demuxer];
        if !demuxer.is_seekable() {
            warn!("{} ⚠️  数据源不支持 seek: {}", log_ctx(), demuxer.description());
            return Err(PlayerError::NotSeekable);
        }
        let accurate = demuxer.accurate_seek();
        let ts_resets = demuxer.ts_resets_possible();

        if self.state.stop_reason == StopReason::AtEndOfFile {
            self.state.stop_reason = StopReason::KeepPlaying;
        }

        let hr_seek = accurate
            && self.opts.correct_pts
            && req.precision != SeekPrecision::Keyframe
            && req.kind != SeekKind::Factor
            && ((self.opts.hr_seek == HrSeekMode::Absolute && req.kind == SeekKind::Absolute)
                || self.opts.hr_seek == HrSeekMode::Always
                || req.precision == SeekPrecision::Exact);

        if req.kind == SeekKind::Factor
            || req.amount < 0.0
            || (req.kind == SeekKind::Absolute && req.amount < self.state.last_chapter_pts)
        {
            self.state.last_chapter_seek = -2;
        }
        if req.kind == SeekKind::Factor {
            if let Some(len) = self.time_length().filter(|&l| l > 0.0) {
                if !ts_resets {
                    req.amount = req.amount * len + self.start_time();
                    req.kind = SeekKind::Absolute;
                }
            }
        }
        if (accurate || self.timeline.is_some()) && req.kind == SeekKind::Relative {
            req.kind = SeekKind::Absolute;
            req.direction = if req.amount > 0.0 { 1 } else { -1 };
            req.amount += self.current_time();
        }
        if req.kind == SeekKind::Absolute && req.amount < 0.0 {
            req.amount = 0.0;
        }

        let mut need_reset = false;
        let mut demuxer_amount = req.amount;
        if self.timeline.is_some() {
            match self.timeline_set_from_time(req.amount) {
                Some((amount, reset)) => {
                    demuxer_amount = amount;
                    need_reset = reset;
                }
                None => {
                    self.state.stop_reason = StopReason::AtEndOfFile;
                    if !timeline_fallthrough {
                        if let Some(audio) = self.audio.as_mut() {
                            audio.ao.reset();
                            audio.buffer.clear();
                        }
                    }
                    return Err(PlayerError::SeekFailed(format!(
                        "{:.3}s 超出时间线终点",
                        req.amount
                    )));
                }
            }
        }
        if need_reset {
            self.reinit_video_chain();
            self.reinit_subs();
        }

        let mut flags = SeekFlags {
            absolute: matches!(req.kind, SeekKind::Absolute | SeekKind::Factor),
            factor: req.kind == SeekKind::Factor,
            ..Default::default()
        };
        if hr_seek || req.direction < 0 {
            flags.backward = true;
        } else if req.direction > 0 {
            flags.forward = true;
        }
        if hr_seek {
            flags.subpreroll = true;
            demuxer_amount -= self.opts.hr_seek_demuxer_offset;
        }

        if let Err(e) = self.sources[self.demuxer].seek(demuxer_amount, flags) {
            warn!("{} ⚠️  demuxer seek 失败: {}", log_ctx(), e);
            if need_reset {
                self.reinit_part_audio(!timeline_fallthrough);
                self.seek_reset(!timeline_fallthrough, false);
            }
            return Err(e);
        }

        // 外部音轨/字幕文件跟着主文件一起跳
        let external: Vec<usize> = StreamType::ALL
            .iter()
            .filter_map(|&s| self.current_track_info(s))
            .filter_map(|t| t.external_source)
            .fold(Vec::new(), |mut acc, idx| {
                if !acc.contains(&idx) {
                    acc.push(idx);
                }
                acc
            });
        if !external.is_empty() {
            let main_pos = if req.kind == SeekKind::Absolute {
                req.amount - self.state.video_offset
            } else {
                self.sources[self.demuxer].current_pts().unwrap_or(0.0)
            };
            let abs = SeekFlags {
                absolute: true,
                ..Default::default()
            };
            for idx in external {
                if let Err(e) = self.sources[idx].seek(main_pos, abs) {
                    warn!("{} ⚠️  外部文件 {} seek 失败: {}", log_ctx(), idx, e);
                }
            }
        }

        if need_reset {
            self.reinit_part_audio(!timeline_fallthrough);
        }
        // 刚重建的音频链路不需要再重置
        self.seek_reset(!timeline_fallthrough, !need_reset);

        // 新帧解码出来之前用目标时间作为当前位置
        if req.kind == SeekKind::Absolute {
            self.state.video_pts = Some(req.amount);
            self.state.last_seek_pts = Some(req.amount);
        } else {
            self.state.last_seek_pts = None;
        }

        // 时间线上普通 seek 也借用精确 seek 的机制跳过片段起点之前的帧
        if hr_seek || self.timeline.is_some() {
            self.state.hrseek_active = true;
            self.state.hrseek_framedrop = true;
            self.state.hrseek_pts = if hr_seek {
                req.amount
            } else {
                self.timeline.as_ref().map_or(0.0, |tl| tl.current_part().start)
            };
        }

        self.state.start_timestamp = self.clock.now();
        info!(
            "{} ⏩ seek {:?} {:.3}s (精确: {}, 数据源内 {:.3}s)",
            log_ctx(),
            req.kind,
            req.amount,
            hr_seek,
            demuxer_amount
        );
        Ok(())
    }

    /// 换片段后重建音频链路；沿用的输出设备里是旧位置的数据，用户 seek 时要清掉
    fn reinit_part_audio(&mut self, reset_ao: bool) {
        self.reinit_audio_chain();
        if reset_ao {
            if let Some(audio) = self.audio.as_mut() {
                audio.ao.reset();
            }
        }
    }

    /// seek 后重置解码和同步状态，下一次迭代重新起播
    pub(crate) fn seek_reset(&mut self, reset_ao: bool, reset_ac: bool) {
        if let Some(chain) = self.video.as_mut() {
            chain.reset();
            if let Some(vo) = self.vo.as_mut() {
                vo.seek_reset();
            }
            chain.pts = self
                .sources
                .get(chain.source)
                .and_then(|d| d.current_pts())
                .map(|p| p + self.state.video_offset);
            self.state.video_pts = chain.pts;
        }
        self.state.delay = 0.0;
        self.state.time_frame = 0.0;

        if reset_ac {
            if let Some(audio) = self.audio.as_mut() {
                audio.reset(reset_ao);
            }
        }
        if let Some(subs) = self.subs.as_mut() {
            subs.reset();
        }

        self.state.restart_playback = true;
        self.state.hrseek_active = false;
        self.state.hrseek_framedrop = false;
        self.state.total_avsync_change = 0.0;
        self.state.drop_frame_count = 0;
        self.state.dropped_frames_in_a_row = 0;
        self.state.playback_pts = None;
    }

    /// 总时长；时间线上是时间线终点
    pub fn time_length(&self) -> Option<f64> {
        match &self.timeline {
            Some(tl) => Some(tl.end()),
            None => self.sources[self.demuxer].stream_length(),
        }
    }

    /// 当前播放位置
    pub fn current_time(&self) -> f64 {
        self.state
            .playback_pts
            .or(self.state.last_seek_pts)
            .unwrap_or(0.0)
    }

    pub fn start_time(&self) -> f64 {
        self.sources[self.demuxer].start_time()
    }

    /// 播放进度（0.0 - 1.0）；时长未知返回 None
    pub fn current_pos_ratio(&self) -> Option<f64> {
        let len = self.time_length().filter(|&l| l > 0.0)?;
        if self.sources[self.demuxer].ts_resets_possible() {
            return None;
        }
        Some(((self.current_time() - self.start_time()) / len).clamp(0.0, 1.0))
    }

    /// 当前章节序号；None 表示没有章节，Some(-1) 表示在第一章之前
    pub fn current_chapter(&self) -> Option<i32> {
        if self.chapters.is_empty() {
            return None;
        }
        let now = self.current_time();
        let mut i = 1;
        while i < self.chapters.len() && now >= self.chapters[i].start {
            i += 1;
        }
        // 刚按章节 seek 时还没有新帧，位置可能略早于章节起点
        Some(self.state.last_chapter_seek.max(i as i32 - 1))
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn chapter_name(&self, chapter: usize) -> Option<&str> {
        self.chapters.get(chapter).and_then(|c| c.name.as_deref())
    }

    pub fn chapter_start_time(&self, chapter: usize) -> Option<f64> {
        self.chapters.get(chapter).map(|c| c.start)
    }

    /// 计算跳到第 `chapter` 章的目标时间；超出最后一章返回 None
    pub(crate) fn seek_chapter(&mut self, chapter: i32) -> Option<f64> {
        self.state.last_chapter_seek = -2;
        if chapter >= self.chapters.len() as i32 {
            return None;
        }
        let chapter = chapter.max(0);
        let pts = self.chapters.get(chapter as usize)?.start;
        self.state.last_chapter_seek = chapter;
        self.state.last_chapter_pts = pts;
        Some(pts)
    }

    /// 播放结束位置（`play_end` 或 `play_start + play_length`）
    pub fn play_end_pts(&self) -> Option<f64> {
        self.opts.play_end.or_else(|| {
            self.opts
                .play_length
                .map(|len| self.opts.play_start.unwrap_or(0.0) + len)
        })
    }
}
