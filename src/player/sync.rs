//! 音视频同步修正
//!
//! 音频时间戳和音频数据时长可能不一致，视频时钟按数据时长推进，
//! 这里每显示一帧就把两者差值的 10% 折算进 `delay`，单次修正量有上限。

use crate::player::context::SyncState;
use crate::player::{log_ctx, PlaybackContext};
use log::warn;

/// 每帧修正掉的差值比例
const CORRECTION_RATIO: f64 = 0.1;

/// 超过这个差值（秒）且丢帧过多时提示一次
const DESYNC_WARN_DIFF: f64 = 0.5;
const DESYNC_WARN_DROPS: u64 = 50;

/// 按已写出音频的时间戳修正 `delay`，返回本次的修正量
///
/// 正在对齐音频或任一时间戳缺失时不修正
pub fn adjust_sync(
    state: &mut SyncState,
    written_audio_pts: Option<f64>,
    video_pts: Option<f64>,
    max_pts_correction: Option<f64>,
    frame_time: f64,
) -> f64 {
    if state.syncing_audio {
        return 0.0;
    }
    let (Some(written), Some(video)) = (written_audio_pts, video_pts) else {
        return 0.0;
    };
    let a_pts = written - state.delay;
    // 让 flip 在目标时刻完成
    let av_delay = a_pts - video + state.last_flip_duration - state.audio_delay;

    let max_change = max_pts_correction.unwrap_or(frame_time * CORRECTION_RATIO);
    let change = (av_delay * CORRECTION_RATIO).clamp(-max_change, max_change);
    state.delay += change;
    state.total_avsync_change += change;
    change
}

impl PlaybackContext {
    /// 显示一帧后的同步修正；没有音频时什么也不做
    pub(crate) fn adjust_sync(&mut self, frame_time: f64) -> f64 {
        if self.audio.is_none() {
            return 0.0;
        }
        let written = self.written_audio_pts();
        let video_pts = self.video.as_ref().and_then(|v| v.pts);
        adjust_sync(
            &mut self.state,
            written,
            video_pts,
            self.opts.max_pts_correction,
            frame_time,
        )
    }

    /// 更新显示用的音视频差值
    pub(crate) fn update_avsync(&mut self) {
        if self.audio.is_none() || self.video.is_none() {
            return;
        }
        let playing = self.playing_audio_pts();
        let state = &mut self.state;
        state.last_av_difference = match (playing, state.video_pts) {
            (Some(a), Some(v)) => {
                let mut diff = a - v - state.audio_delay;
                if state.time_frame > 0.0 {
                    diff += state.time_frame * self.opts.playback_speed;
                }
                Some(diff)
            }
            _ => None,
        };
        if let Some(diff) = state.last_av_difference {
            if diff > DESYNC_WARN_DIFF
                && state.drop_frame_count > DESYNC_WARN_DROPS
                && !state.drop_message_shown
            {
                warn!(
                    "{} ⚠️  音视频不同步 {:.3}s，已丢弃 {} 帧，系统可能太慢，尝试开启丢帧或降低分辨率",
                    log_ctx(),
                    diff,
                    state.drop_frame_count
                );
                state.drop_message_shown = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlaybackOptions;

    fn state() -> SyncState {
        let mut s = SyncState::new(&PlaybackOptions::default());
        s.restart_playback = false;
        s
    }

    #[test]
    fn test_change_is_bounded() {
        let mut s = state();
        for (written, video) in [(10.0, 0.0), (-10.0, 0.0), (0.3, 0.25), (1.0, 1.0)] {
            let before = s.delay;
            let change = adjust_sync(&mut s, Some(written), Some(video), None, 0.04);
            assert!(change.abs() <= 0.004 + 1e-12);
            assert!((s.delay - before - change).abs() < 1e-12);
        }
    }

    #[test]
    fn test_explicit_max_correction() {
        let mut s = state();
        let change = adjust_sync(&mut s, Some(5.0), Some(0.0), Some(0.05), 0.04);
        assert!((change - 0.05).abs() < 1e-12);
        assert!((s.total_avsync_change - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_skipped_while_syncing_or_missing_pts() {
        let mut s = state();
        s.syncing_audio = true;
        assert_eq!(adjust_sync(&mut s, Some(5.0), Some(0.0), None, 0.04), 0.0);
        s.syncing_audio = false;
        assert_eq!(adjust_sync(&mut s, None, Some(0.0), None, 0.04), 0.0);
        assert_eq!(adjust_sync(&mut s, Some(1.0), None, None, 0.04), 0.0);
        assert_eq!(s.delay, 0.0);
        assert_eq!(s.total_avsync_change, 0.0);
    }

    #[test]
    fn test_fast_audio_timestamps_pull_delay_up() {
        // 音频时间戳比数据时长快 20%：每帧写出 0.04s 数据，时间戳前进 0.048s
        let mut s = state();
        let frame_time = 0.04;
        let mut written = 0.0;
        let mut video = 0.0;
        let mut last_total = 0.0;
        for _ in 0..200 {
            written += 0.048;
            s.delay += 0.04;
            video += frame_time;
            s.delay -= frame_time;
            let change = adjust_sync(&mut s, Some(written), Some(video), None, frame_time);
            assert!(change >= 0.0);
            assert!(change <= frame_time * 0.1 + 1e-12);
            assert!(s.total_avsync_change >= last_total);
            last_total = s.total_avsync_change;
        }
        assert!(s.delay > 0.0);
        assert!(s.total_avsync_change > 0.0);
    }
}
