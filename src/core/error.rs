use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("没有可用的数据源")]
    NoSource,

    #[error("数据源不支持 seek")]
    NotSeekable,

    #[error("Seek 失败: {0}")]
    SeekFailed(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("视频输出错误: {0}")]
    VideoOutputError(String),

    #[error("轨道错误: {0}")]
    TrackError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
