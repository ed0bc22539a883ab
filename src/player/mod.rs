// 播放核心模块：单线程播放循环和它依赖的外部协作者接口

pub mod demuxer_source;
pub mod decoder;
pub mod audio_output;
#[cfg(feature = "cpal-output")]
pub mod cpal_output;
pub mod video_output;
pub mod backend;
pub mod input;
pub mod context;
pub mod pts;
pub mod audio_sync;
pub mod framedrop;
pub mod sync;
pub mod video_pump;
pub mod seek;
pub mod timeline;
pub mod tracks;
pub mod subtitles;
pub mod command;
pub mod playloop;
pub mod synthetic;

pub use demuxer_source::{DemuxerSource, MediaPacket, SeekFlags};
pub use decoder::{AudioDecoder, SubtitleDecoder, VideoDecoder};
pub use audio_output::AudioOutput;
pub use video_output::VideoOutput;
pub use backend::MediaBackend;
pub use input::{ChannelCommandSource, CommandSource};
pub use context::{PlaybackContext, SyncState};
pub use timeline::{Timeline, TimelinePart};

use std::process;
use std::thread;

/// 日志前缀：进程号和线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}
