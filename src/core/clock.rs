use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 单调时间源（秒）
///
/// 播放循环只通过这个接口读时间和睡眠，测试里可以换成手动推进的时钟
pub trait TimeSource: Send + Sync {
    /// 当前单调时间（秒）
    fn now(&self) -> f64;

    /// 睡眠指定秒数
    fn sleep(&self, seconds: f64);
}

/// 系统时钟
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sleep(&self, seconds: f64) {
        if seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
}

/// 手动时钟：只有调用 sleep/advance 时才前进
///
/// 记录每一次 sleep 的时长，方便测试检查调度节奏
pub struct ManualTimeSource {
    inner: Mutex<ManualInner>,
}

struct ManualInner {
    now: f64,
    sleeps: Vec<f64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                now: 0.0,
                sleeps: Vec::new(),
            }),
        }
    }

    /// 直接推进时间（不记为 sleep）
    pub fn advance(&self, seconds: f64) {
        self.inner.lock().now += seconds.max(0.0);
    }

    /// 迄今为止所有 sleep 调用的时长
    pub fn sleeps(&self) -> Vec<f64> {
        self.inner.lock().sleeps.clone()
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        self.inner.lock().now
    }

    fn sleep(&self, seconds: f64) {
        let mut inner = self.inner.lock();
        if seconds > 0.0 {
            inner.now += seconds;
        }
        inner.sleeps.push(seconds.max(0.0));
    }
}

/// softsleep 模式下最后这段时间用忙等代替 sleep（假设内核 HZ=100）
const SOFTSLEEP_MARGIN: f64 = 0.011;

/// 播放时钟 - 记录上一次采样时刻，返回两次采样之间的增量
#[derive(Clone)]
pub struct PlaybackClock {
    source: Arc<dyn TimeSource>,
    last_time: f64,
}

impl PlaybackClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        let last_time = source.now();
        Self { source, last_time }
    }

    /// 当前单调时间（秒），不影响采样点
    pub fn now(&self) -> f64 {
        self.source.now()
    }

    /// 上一次采样时刻
    pub fn last_sample(&self) -> f64 {
        self.last_time
    }

    /// 返回距上一次调用经过的秒数，并把采样点更新为现在
    ///
    /// 底层计时器回绕时返回 0，保证结果不会为负
    pub fn elapsed_since_last_sample(&mut self) -> f64 {
        let now = self.source.now();
        let delta = now - self.last_time;
        self.last_time = now;
        if delta.is_finite() && delta > 0.0 {
            delta
        } else {
            0.0
        }
    }

    pub fn sleep(&self, seconds: f64) {
        self.source.sleep(seconds);
    }

    /// 睡到 `time_frame` 耗尽为止，返回剩余（可能为负）的帧时间
    ///
    /// softsleep 需要真实时间源，否则忙等阶段无法前进
    pub fn timing_sleep(&mut self, mut time_frame: f64, softsleep: bool) -> f64 {
        let margin = if softsleep { SOFTSLEEP_MARGIN } else { 0.0 };
        while time_frame > margin {
            self.source.sleep(time_frame - margin);
            time_frame -= self.elapsed_since_last_sample();
        }
        if softsleep {
            if time_frame < 0.0 {
                log::warn!("⚠️  Softsleep underflow: {:.4}s", time_frame);
            }
            while time_frame > 0.0 {
                time_frame -= self.elapsed_since_last_sample();
                std::hint::spin_loop();
            }
        }
        time_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_updates_sample() {
        let source = Arc::new(ManualTimeSource::new());
        let mut clock = PlaybackClock::new(source.clone());
        source.advance(0.25);
        assert!((clock.elapsed_since_last_sample() - 0.25).abs() < 1e-9);
        assert_eq!(clock.elapsed_since_last_sample(), 0.0);
    }

    #[test]
    fn test_elapsed_never_negative() {
        struct Backwards(Mutex<f64>);
        impl TimeSource for Backwards {
            fn now(&self) -> f64 {
                let mut t = self.0.lock();
                *t -= 1.0;
                *t
            }
            fn sleep(&self, _seconds: f64) {}
        }
        let mut clock = PlaybackClock::new(Arc::new(Backwards(Mutex::new(100.0))));
        assert_eq!(clock.elapsed_since_last_sample(), 0.0);
    }

    #[test]
    fn test_timing_sleep_consumes_frame_time() {
        let source = Arc::new(ManualTimeSource::new());
        let mut clock = PlaybackClock::new(source.clone());
        let left = clock.timing_sleep(0.04, false);
        assert!(left.abs() < 1e-9);
        assert_eq!(source.sleeps().len(), 1);
        assert!((source.now() - 0.04).abs() < 1e-9);
    }
}
