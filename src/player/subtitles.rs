use crate::core::{StreamType, TrackId};
use crate::player::{DemuxerSource, MediaPacket, PlaybackContext, SubtitleDecoder};
use log::trace;

/// 字幕链路：按显示位置把到期的字幕包送进解码器
pub struct SubtitleChain {
    pub(crate) track: TrackId,
    pub(crate) source: usize,
    decoder: Box<dyn SubtitleDecoder>,
    /// 读出来但还没到时间的包
    pending: Option<MediaPacket>,
}

impl SubtitleChain {
    pub(crate) fn new(track: TrackId, source: usize, decoder: Box<dyn SubtitleDecoder>) -> Self {
        Self {
            track,
            source,
            decoder,
            pending: None,
        }
    }

    /// 送入所有不晚于 `refpts`（数据源内时间）的包，再按显示时间刷新
    pub(crate) fn update(&mut self, demuxer: &mut dyn DemuxerSource, refpts_source: f64, refpts: f64) {
        loop {
            let packet = match self.pending.take() {
                Some(p) => p,
                None => match demuxer.next_packet(StreamType::Subtitle) {
                    Some(p) => p,
                    None => break,
                },
            };
            match packet.pts {
                Some(pts) if pts > refpts_source => {
                    self.pending = Some(packet);
                    break;
                }
                _ => {
                    trace!("💬 字幕包 {:?}", packet.pts);
                    self.decoder.decode(&packet);
                }
            }
        }
        self.decoder.update(refpts);
    }

    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.decoder.reset();
    }
}

impl PlaybackContext {
    /// 按当前显示位置更新字幕
    pub(crate) fn update_subtitles(&mut self, refpts: Option<f64>) {
        let Some(refpts) = refpts else {
            return;
        };
        let Some(subs) = self.subs.as_mut() else {
            return;
        };
        // 外部字幕文件的时间不带时间线偏移
        let refpts_source = if subs.source == self.demuxer {
            refpts - self.state.video_offset
        } else {
            refpts
        };
        if let Some(demuxer) = self.sources.get_mut(subs.source) {
            subs.update(demuxer.as_mut(), refpts_source, refpts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTimeSource, PlaybackOptions, TrackSelection};
    use crate::player::synthetic::{ScriptedCommandSource, SyntheticBackend, SyntheticDemuxer};
    use std::sync::Arc;

    #[test]
    fn test_feeds_only_due_packets() {
        let time = Arc::new(ManualTimeSource::new());
        let demuxer = SyntheticDemuxer::new("s")
            .with_video(25.0, 50)
            .with_subtitles(&[(0.5, "one"), (1.0, "two"), (1.5, "three")]);
        let backend = SyntheticBackend::new(time.clone());
        let shown = backend.subtitle_log();
        let input = ScriptedCommandSource::new(time.clone());
        let opts = PlaybackOptions {
            sub_id: TrackSelection::Id(1),
            ..Default::default()
        };
        let mut ctx = PlaybackContext::new(
            opts,
            vec![Box::new(demuxer)],
            Box::new(backend),
            Box::new(input),
            time,
        )
        .unwrap();
        ctx.load().unwrap();

        ctx.update_subtitles(Some(0.2));
        assert!(shown.lock().is_empty());
        ctx.update_subtitles(Some(1.2));
        assert_eq!(*shown.lock(), vec!["one".to_string(), "two".to_string()]);
        ctx.update_subtitles(None);
        ctx.update_subtitles(Some(2.0));
        assert_eq!(shown.lock().len(), 3);
    }
}
