use crate::core::AudioFormat;

/// 音频输出设备
///
/// 设备自己管理采样内存；播放循环只保留一块临时的待写缓冲
pub trait AudioOutput {
    fn format(&self) -> AudioFormat;

    /// 写入交错 PCM，返回实际接受的字节数（整采样帧）
    ///
    /// `final_chunk` 表示这是文件的最后一段数据，设备应接受不足一个周期的数据
    fn write(&mut self, data: &[u8], final_chunk: bool) -> usize;

    /// 可以立即写入的字节数
    fn get_space(&self) -> usize;

    /// 已写入但还没播出的时长（秒）
    fn get_delay(&self) -> f64;

    fn pause(&mut self);

    fn resume(&mut self);

    /// 丢弃所有已缓冲数据
    fn reset(&mut self);

    /// 设备不提供时间信息（例如写文件），播放循环不等它
    fn is_untimed(&self) -> bool {
        false
    }
}
