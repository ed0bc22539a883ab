// 播放核心库：音视频同步与调度引擎

pub mod core;
pub mod player;

pub use crate::core::{PlaybackOptions, PlayerError, Result, StopReason};
pub use crate::player::PlaybackContext;
