use crate::core::{PlayerCommand, SeekKind, SeekPrecision, StopReason, TrackId};
use crate::player::{log_ctx, PlaybackContext};
use log::{debug, info, warn};

impl PlaybackContext {
    /// 执行一条用户命令
    ///
    /// seek 类命令只排队，由播放循环在本次迭代最后执行
    pub fn run_command(&mut self, cmd: PlayerCommand) {
        debug!("{} 🎛️  命令: {:?}", log_ctx(), cmd);
        match cmd {
            PlayerCommand::Seek {
                kind,
                amount,
                precision,
            } => self.queue_seek(kind, amount, precision),
            PlayerCommand::SetChapter { chapter } => self.goto_chapter(chapter as i32, 1),
            PlayerCommand::AddChapter { step } => {
                let Some(current) = self.current_chapter() else {
                    warn!("{} ⚠️  没有章节信息", log_ctx());
                    return;
                };
                self.goto_chapter(current + step, step);
            }
            PlayerCommand::SetPause { paused } => {
                if paused {
                    self.pause_player();
                } else {
                    self.unpause_player();
                }
            }
            PlayerCommand::CyclePause => {
                if self.state.paused {
                    self.unpause_player();
                } else {
                    self.pause_player();
                }
            }
            PlayerCommand::FrameStep => self.add_step_frame(),
            PlayerCommand::SwitchTrack { stream, track } => {
                self.switch_track(stream, track.map(TrackId))
            }
            PlayerCommand::CycleTrack { stream } => self.cycle_track(stream),
            PlayerCommand::AddAudioDelay { seconds } => {
                // 只改期望差值，由同步修正逐帧追上
                self.state.audio_delay += seconds;
                info!("{} 🎚️  音频延迟: {:.3}s", log_ctx(), self.state.audio_delay);
            }
            PlayerCommand::SetSpeed { speed } => {
                if speed.is_finite() && speed > 0.0 {
                    self.opts.playback_speed = speed;
                    info!("{} 🏎️  播放速度: {:.2}x", log_ctx(), speed);
                } else {
                    warn!("{} ⚠️  无效的播放速度: {}", log_ctx(), speed);
                }
            }
            PlayerCommand::PlaylistNext => self.state.stop_reason = StopReason::NextEntry,
            PlayerCommand::PlaylistPrev => self.state.stop_reason = StopReason::CurrentEntry,
            PlayerCommand::Reload => self.state.stop_reason = StopReason::Restart,
            PlayerCommand::Stop => self.state.stop_reason = StopReason::Stop,
            PlayerCommand::Quit => self.state.stop_reason = StopReason::Quit,
        }
    }

    /// 跳到指定章节；向后越过最后一章时切到下一个文件
    fn goto_chapter(&mut self, chapter: i32, step: i32) {
        if self.chapters.is_empty() {
            warn!("{} ⚠️  没有章节信息", log_ctx());
            return;
        }
        match self.seek_chapter(chapter) {
            Some(pts) => {
                info!("{} 📖 跳到第 {} 章 @ {:.3}s", log_ctx(), chapter.max(0) + 1, pts);
                self.queue_seek(SeekKind::Absolute, pts, SeekPrecision::Default);
            }
            None if step > 0 => self.state.stop_reason = StopReason::NextEntry,
            None => {}
        }
    }
}
