use crate::core::{Result, VideoFrame};

/// 视频输出设备
///
/// 最多缓存一帧待显示的画面，由 `flip` 换到屏幕上
pub trait VideoOutput {
    /// 按帧尺寸（重新）配置输出
    fn configure(&mut self, width: u32, height: u32) -> Result<()>;

    /// 已有一帧排队等待显示
    fn has_buffered_frame(&self) -> bool;

    /// 屏幕上已经显示过画面
    fn has_frame(&self) -> bool;

    fn queue_frame(&mut self, frame: VideoFrame);

    /// 排队帧的时间戳
    fn next_pts(&self) -> Option<f64>;

    /// 丢弃排队帧，不显示
    fn skip_frame(&mut self);

    /// 显示排队帧；`target_time_us` 是期望的显示时刻
    ///
    /// 返回 flip 本身花掉的时间（秒）
    fn flip(&mut self, target_time_us: i64) -> f64;

    /// 设备自己按目标时刻定时显示
    fn flip_is_timed(&self) -> bool {
        false
    }

    /// seek 后丢弃排队帧
    fn seek_reset(&mut self);

    /// 不做任何等待，帧到了就显示
    fn is_untimed(&self) -> bool {
        false
    }

    /// 设备内部的显示队列延迟（秒）
    fn flip_queue_offset(&self) -> f64 {
        0.0
    }

    /// 设备需要播放循环至少多久醒来一次
    fn wakeup_period(&self) -> Option<f64> {
        None
    }

    /// 窗口需要重绘（例如被遮挡后）
    fn wants_redraw(&mut self) -> bool {
        false
    }

    /// 重绘上一帧；不支持时返回 false
    fn redraw(&mut self) -> bool {
        false
    }

    fn pause(&mut self) {}

    fn resume(&mut self) {}
}
