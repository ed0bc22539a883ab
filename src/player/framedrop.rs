use crate::core::FrameDropMode;
use crate::player::context::SyncState;
use crate::player::log_ctx;
use log::debug;

/// 允许的音视频落后量（秒），超过才开始丢帧
const DROP_TOLERANCE: f64 = 0.100;

/// 当前的丢帧门限：连续丢得越多，门限越低，避免一直连续丢帧
pub fn drop_threshold(dropped_in_a_row: u32, frame_time: f64) -> f64 {
    -(dropped_in_a_row as f64) * frame_time - DROP_TOLERANCE
}

/// 判断下一帧是否要丢
///
/// `ao_delay` 为 None 表示没有可参考的音频（无音频、无时序输出或音频已结束），此时从不丢帧。
/// 视频落后于音频超过门限、且不在暂停或起播阶段时，返回配置的丢帧方式
pub fn check_framedrop(
    state: &mut SyncState,
    ao_delay: Option<f64>,
    speed: f64,
    policy: FrameDropMode,
    frame_time: f64,
) -> FrameDropMode {
    let Some(ao_delay) = ao_delay else {
        return FrameDropMode::None;
    };
    let d = speed * ao_delay - state.delay;
    if d < drop_threshold(state.dropped_frames_in_a_row, frame_time)
        && !state.paused
        && !state.restart_playback
    {
        state.drop_frame_count += 1;
        state.dropped_frames_in_a_row += 1;
        if policy != FrameDropMode::None {
            debug!(
                "{} 🗑️  视频落后 {:.3}s，丢帧 (连续 {})",
                log_ctx(),
                -d,
                state.dropped_frames_in_a_row
            );
        }
        return policy;
    }
    state.dropped_frames_in_a_row = 0;
    FrameDropMode::None
}
