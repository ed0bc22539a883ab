use crate::core::{AudioFormat, PlayerError, Result, SampleFormat, Track};
use crate::player::{
    log_ctx, AudioDecoder, AudioOutput, MediaBackend, SubtitleDecoder, VideoDecoder, VideoOutput,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 设备侧缓冲时长（秒）
const DEVICE_BUFFER_SECONDS: f64 = 0.25;

/// 音频输出 - 使用 cpal 播放音频
///
/// 解码出的 PCM 转成 f32 放进无锁队列，由 cpal 回调线程取走
pub struct CpalAudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    format: AudioFormat,
    /// 队列容量（设备采样数）
    capacity: usize,
    paused: bool,
}

impl CpalAudioOutput {
    /// 创建音频输出；设备不支持请求的声道数时回退到立体声/单声道
    pub fn new(format: AudioFormat) -> Result<Self> {
        info!(
            "{} 初始化音频输出: {} Hz, {} 声道",
            log_ctx(),
            format.sample_rate,
            format.channels
        );

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        // 采样率必须一致，delay 按输入格式计算
        let candidates = [format.channels, 2, 1];
        let mut config = None;
        for channels in candidates {
            let wanted = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let supported_configs = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
            if supported_configs
                .into_iter()
                .any(|supported| Self::is_config_compatible(&wanted, &supported))
            {
                if channels != format.channels {
                    warn!(
                        "⚠️  音频设备不支持 {} 声道，回退到 {} 声道",
                        format.channels, channels
                    );
                }
                config = Some(wanted);
                break;
            }
        }
        let config = config.ok_or_else(|| {
            PlayerError::AudioError(format!(
                "音频设备不支持 {} Hz, {} 声道",
                format.sample_rate, format.channels
            ))
        })?;

        let capacity = (DEVICE_BUFFER_SECONDS * format.sample_rate as f64) as usize
            * config.channels as usize;
        let mut output = Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            format,
            capacity,
            paused: false,
        };
        output.start()?;
        Ok(output)
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().unwrap_or(0.0);
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("{} 音频输出已启动", log_ctx());
        Ok(())
    }

    fn device_channels(&self) -> usize {
        self.config.channels.max(1) as usize
    }

    /// 一个采样帧转成设备声道数的 f32 采样
    fn push_frame(&self, frame: &[u8]) {
        let bytes = self.format.sample_format.bytes_per_sample();
        let src_channels = self.format.channels.max(1) as usize;
        let sample_at = |ch: usize| -> f32 {
            let raw = &frame[ch * bytes..(ch + 1) * bytes];
            match self.format.sample_format {
                SampleFormat::U8 => (raw[0] as f32 - 128.0) / 128.0,
                SampleFormat::I16 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
                SampleFormat::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            }
        };
        for ch in 0..self.device_channels() {
            self.buffer.push(sample_at(ch.min(src_channels - 1)));
        }
    }
}

impl AudioOutput for CpalAudioOutput {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, data: &[u8], _final_chunk: bool) -> usize {
        let unit = self.format.unit_size().max(1);
        let frames = (data.len() / unit).min(self.get_space() / unit);
        for frame in data[..frames * unit].chunks_exact(unit) {
            self.push_frame(frame);
        }
        frames * unit
    }

    fn get_space(&self) -> usize {
        let free_frames = self.capacity.saturating_sub(self.buffer.len()) / self.device_channels();
        free_frames * self.format.unit_size()
    }

    fn get_delay(&self) -> f64 {
        let frames = self.buffer.len() / self.device_channels();
        frames as f64 / self.format.sample_rate.max(1) as f64
    }

    fn pause(&mut self) {
        if self.paused {
            return;
        }
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("⚠️  暂停音频流失败: {}", e);
            }
        }
        self.paused = true;
    }

    fn resume(&mut self) {
        if !self.paused {
            return;
        }
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                warn!("⚠️  恢复音频流失败: {}", e);
            }
        }
        self.paused = false;
    }

    fn reset(&mut self) {
        while self.buffer.pop().is_some() {}
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            info!("{} 音频输出已停止", log_ctx());
        }
    }
}

/// 用 cpal 设备替换另一个后端的音频输出，其余部分原样委托
pub struct CpalBackend {
    inner: Box<dyn MediaBackend>,
}

impl CpalBackend {
    pub fn new(inner: Box<dyn MediaBackend>) -> Self {
        Self { inner }
    }
}

impl MediaBackend for CpalBackend {
    fn open_audio_decoder(&mut self, track: &Track) -> Result<Box<dyn AudioDecoder>> {
        self.inner.open_audio_decoder(track)
    }

    fn open_video_decoder(&mut self, track: &Track) -> Result<Box<dyn VideoDecoder>> {
        self.inner.open_video_decoder(track)
    }

    fn open_subtitle_decoder(&mut self, track: &Track) -> Result<Box<dyn SubtitleDecoder>> {
        self.inner.open_subtitle_decoder(track)
    }

    fn open_audio_output(&mut self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalAudioOutput::new(format)?))
    }

    fn open_video_output(&mut self) -> Result<Box<dyn VideoOutput>> {
        self.inner.open_video_output()
    }
}
