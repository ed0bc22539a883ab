//! 多来源时间线
//!
//! 一个虚拟时间轴由若干片段拼接而成，每个片段播放某个数据源里的一段。
//! 片段之间切换数据源时，各条解码链路需要重建。

use crate::core::{Chapter, PlayerError, Result, StreamType};
use crate::player::{log_ctx, PlaybackContext};
use log::{debug, info};

/// 时间线片段
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePart {
    /// 片段在时间线上的起点（秒）
    pub start: f64,
    /// 片段在数据源内部的起点（秒）
    pub source_start: f64,
    /// 数据源索引
    pub source: usize,
}

impl TimelinePart {
    pub fn new(start: f64, source_start: f64, source: usize) -> Self {
        Self {
            start,
            source_start,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    parts: Vec<TimelinePart>,
    /// 最后一个片段的终点
    end: f64,
    current: usize,
    chapters: Vec<Chapter>,
}

impl Timeline {
    /// 片段必须非空且按起点递增
    pub fn new(parts: Vec<TimelinePart>, end: f64) -> Result<Self> {
        if parts.is_empty() {
            return Err(PlayerError::Other("时间线没有片段".to_string()));
        }
        let ordered = parts.windows(2).all(|w| w[0].start < w[1].start);
        let last_start = parts[parts.len() - 1].start;
        if !ordered || end <= last_start {
            return Err(PlayerError::Other("时间线片段未按时间递增".to_string()));
        }
        Ok(Self {
            parts,
            end,
            current: 0,
            chapters: Vec::new(),
        })
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn parts(&self) -> &[TimelinePart] {
        &self.parts
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_part(&self) -> TimelinePart {
        self.parts[self.current]
    }

    /// 第 i 个片段的终点（下一个片段的起点）
    pub fn part_end(&self, i: usize) -> f64 {
        self.parts.get(i + 1).map_or(self.end, |p| p.start)
    }

    /// 包含 `pts` 的片段；超出终点返回 None
    pub fn locate(&self, pts: f64) -> Option<usize> {
        let pts = pts.max(0.0);
        (0..self.parts.len()).find(|&i| pts < self.part_end(i))
    }
}

impl PlaybackContext {
    /// 切换到第 i 个片段，返回是否换了数据源（链路需要重建）
    pub(crate) fn timeline_set_part(&mut self, i: usize, force: bool) -> bool {
        let Some(tl) = self.timeline.as_mut() else {
            return false;
        };
        let prev = tl.current_part();
        let Some(&next) = tl.parts.get(i) else {
            return false;
        };
        tl.current = i;
        self.state.video_offset = next.start - next.source_start;
        if next.source == prev.source && !force {
            return false;
        }

        info!(
            "{} 🧩 切换到时间线片段 {}: 数据源 {} -> {}",
            log_ctx(),
            i,
            prev.source,
            next.source
        );
        self.video = None;
        if !self.opts.fixed_vo {
            self.vo = None;
        }
        // 无缝音频：只丢解码器，输出设备留给下一个片段
        let chain = self.audio.take();
        self.gapless_ao = chain.filter(|_| self.opts.gapless_audio).map(|c| c.ao);
        self.subs = None;

        self.demuxer = next.source;
        for stream in StreamType::ALL {
            self.preselect_demux_stream(stream);
        }
        true
    }

    /// 按时间线位置切换片段，返回数据源内的时间和是否需要重建链路
    ///
    /// 超出时间线终点返回 None
    pub(crate) fn timeline_set_from_time(&mut self, pts: f64) -> Option<(f64, bool)> {
        let pts = pts.max(0.0);
        let tl = self.timeline.as_ref()?;
        let i = tl.locate(pts)?;
        let part = tl.parts[i];
        let need_reset = self.timeline_set_part(i, false);
        debug!(
            "🧩 时间线 {:.3}s -> 片段 {} 源内 {:.3}s",
            pts,
            i,
            pts - part.start + part.source_start
        );
        Some((pts - part.start + part.source_start, need_reset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioFormat, ManualTimeSource, PlaybackOptions, SampleFormat, SeekRequest};
    use crate::player::synthetic::{ScriptedCommandSource, SyntheticBackend, SyntheticDemuxer};
    use std::sync::Arc;

    fn timeline() -> Timeline {
        Timeline::new(
            vec![
                TimelinePart::new(0.0, 0.0, 0),
                TimelinePart::new(10.0, 5.0, 1),
                TimelinePart::new(15.0, 20.0, 0),
            ],
            25.0,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unordered_parts() {
        assert!(Timeline::new(Vec::new(), 1.0).is_err());
        let parts = vec![TimelinePart::new(5.0, 0.0, 0), TimelinePart::new(1.0, 0.0, 0)];
        assert!(Timeline::new(parts, 10.0).is_err());
        assert!(Timeline::new(vec![TimelinePart::new(0.0, 0.0, 0)], 0.0).is_err());
    }

    #[test]
    fn test_locate_and_part_end() {
        let tl = timeline();
        assert_eq!(tl.locate(-3.0), Some(0));
        assert_eq!(tl.locate(9.99), Some(0));
        assert_eq!(tl.locate(10.0), Some(1));
        assert_eq!(tl.locate(24.0), Some(2));
        assert_eq!(tl.locate(25.0), None);
        assert_eq!(tl.part_end(0), 10.0);
        assert_eq!(tl.part_end(2), 25.0);
    }

    /// 两个纯音频来源拼成的时间线，第一个片段写入 0.1s 音频后自然进入第二个片段
    fn cross_part(gapless_audio: bool) -> (PlaybackContext, usize, f64) {
        let time = Arc::new(ManualTimeSource::new());
        let format = AudioFormat::new(8000, 2, SampleFormat::I16);
        let first = SyntheticDemuxer::new("part-a").with_audio(format, 1.0, 0.1);
        let second = SyntheticDemuxer::new("part-b").with_audio(format, 1.0, 0.1);
        let backend = SyntheticBackend::new(time.clone());
        let opens = backend.output_opens();
        let opts = PlaybackOptions {
            gapless_audio,
            ..Default::default()
        };
        let mut ctx = PlaybackContext::new(
            opts,
            vec![Box::new(first), Box::new(second)],
            Box::new(backend),
            Box::new(ScriptedCommandSource::new(time.clone())),
            time,
        )
        .unwrap();
        let tl = Timeline::new(
            vec![TimelinePart::new(0.0, 0.0, 0), TimelinePart::new(1.0, 0.0, 1)],
            2.0,
        )
        .unwrap();
        ctx.set_timeline(tl).unwrap();
        ctx.load().unwrap();
        ctx.audio.as_mut().unwrap().ao.write(&[0; 3200], false);

        ctx.execute_seek(SeekRequest::absolute(1.0), true).unwrap();
        assert_eq!(ctx.demuxer, 1);
        assert!(ctx.has_audio());
        let delay = ctx.audio.as_ref().unwrap().ao.get_delay();
        let audio_opens = opens.lock().audio;
        (ctx, audio_opens, delay)
    }

    #[test]
    fn test_gapless_audio_keeps_output_across_parts() {
        let (ctx, audio_opens, delay) = cross_part(true);
        assert_eq!(audio_opens, 1);
        // 上一个片段写进设备的数据继续播放
        assert!((delay - 0.1).abs() < 1e-9, "delay = {}", delay);
        assert!(ctx.gapless_ao.is_none());
        assert!(ctx.state.syncing_audio);
    }

    #[test]
    fn test_part_switch_reopens_output_without_gapless() {
        let (_ctx, audio_opens, delay) = cross_part(false);
        assert_eq!(audio_opens, 2);
        assert_eq!(delay, 0.0);
    }
}
