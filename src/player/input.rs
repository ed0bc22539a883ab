use crate::core::PlayerCommand;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info};
use std::time::Duration;

/// 用户命令来源
///
/// `wait` 是播放循环唯一的阻塞点：有命令到达或超时就返回
pub trait CommandSource {
    /// 等待最多 `timeout` 秒，直到有命令可取
    fn wait(&mut self, timeout: f64);

    /// 查看下一条已就绪的命令，不取出
    fn peek(&mut self) -> Option<&PlayerCommand>;

    /// 取出下一条已就绪的命令
    fn take(&mut self) -> Option<PlayerCommand>;
}

/// 基于 channel 的命令源，带一个槽位的预读缓冲
pub struct ChannelCommandSource {
    rx: Receiver<PlayerCommand>,
    pending: Option<PlayerCommand>,
    disconnected: bool,
}

impl ChannelCommandSource {
    pub fn new(rx: Receiver<PlayerCommand>) -> Self {
        Self {
            rx,
            pending: None,
            disconnected: false,
        }
    }

    /// 创建一对发送端和命令源
    pub fn channel() -> (Sender<PlayerCommand>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self::new(rx))
    }

    fn fill(&mut self) {
        if self.pending.is_some() || self.disconnected {
            return;
        }
        match self.rx.try_recv() {
            Ok(cmd) => self.pending = Some(cmd),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.mark_disconnected(),
        }
    }

    fn mark_disconnected(&mut self) {
        if !self.disconnected {
            info!("🔌 命令通道已关闭");
            self.disconnected = true;
        }
    }
}

impl CommandSource for ChannelCommandSource {
    fn wait(&mut self, timeout: f64) {
        if self.pending.is_some() || !(timeout > 0.0) {
            return;
        }
        let timeout = Duration::from_secs_f64(timeout);
        if self.disconnected {
            // 没有发送端了，仍然按超时让出时间片
            std::thread::sleep(timeout);
            return;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(cmd) => {
                debug!("📨 收到命令: {:?}", cmd);
                self.pending = Some(cmd);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.mark_disconnected(),
        }
    }

    fn peek(&mut self) -> Option<&PlayerCommand> {
        self.fill();
        self.pending.as_ref()
    }

    fn take(&mut self) -> Option<PlayerCommand> {
        self.fill();
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_does_not_consume() {
        let (tx, mut source) = ChannelCommandSource::channel();
        tx.send(PlayerCommand::CyclePause).unwrap();
        tx.send(PlayerCommand::Quit).unwrap();
        assert_eq!(source.peek(), Some(&PlayerCommand::CyclePause));
        assert_eq!(source.peek(), Some(&PlayerCommand::CyclePause));
        assert_eq!(source.take(), Some(PlayerCommand::CyclePause));
        assert_eq!(source.take(), Some(PlayerCommand::Quit));
        assert_eq!(source.take(), None);
    }

    #[test]
    fn test_wait_returns_on_command() {
        let (tx, mut source) = ChannelCommandSource::channel();
        tx.send(PlayerCommand::Stop).unwrap();
        source.wait(5.0);
        assert_eq!(source.take(), Some(PlayerCommand::Stop));
    }

    #[test]
    fn test_disconnected_source_is_empty() {
        let (tx, mut source) = ChannelCommandSource::channel();
        drop(tx);
        source.wait(0.001);
        assert!(source.peek().is_none());
    }
}
