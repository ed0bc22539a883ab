use anyhow::Result;
use log::info;
use myy_playloop::core::{
    AudioFormat, PlaybackOptions, PlayerCommand, SampleFormat, SeekKind, SeekPrecision,
    SystemTimeSource,
};
use myy_playloop::player::synthetic::{SyntheticBackend, SyntheticDemuxer};
use myy_playloop::player::{ChannelCommandSource, MediaBackend};
use myy_playloop::PlaybackContext;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playloop 演示启动");

    // 可选的 JSON 选项文件
    let opts = match std::env::args().nth(1) {
        Some(path) => {
            info!("📄 加载选项: {}", path);
            PlaybackOptions::from_json_file(&path)
                .map_err(|e| anyhow::anyhow!("选项加载失败: {}", e))?
        }
        None => PlaybackOptions::default(),
    };

    // 10 秒的合成音视频文件
    let demuxer = SyntheticDemuxer::new("demo")
        .with_video(25.0, 250)
        .with_audio(AudioFormat::new(48000, 2, SampleFormat::I16), 10.0, 0.02)
        .with_length(10.0);

    let time = Arc::new(SystemTimeSource::new());
    let synthetic = SyntheticBackend::new(time.clone());
    let backend: Box<dyn MediaBackend> = {
        #[cfg(feature = "cpal-output")]
        {
            Box::new(myy_playloop::player::cpal_output::CpalBackend::new(Box::new(synthetic)))
        }
        #[cfg(not(feature = "cpal-output"))]
        {
            Box::new(synthetic)
        }
    };

    // 模拟用户操作
    let (tx, input) = ChannelCommandSource::channel();
    let script = vec![
        (1.0, PlayerCommand::Seek {
            kind: SeekKind::Relative,
            amount: 3.0,
            precision: SeekPrecision::Default,
        }),
        (2.0, PlayerCommand::CyclePause),
        (2.5, PlayerCommand::FrameStep),
        (3.0, PlayerCommand::CyclePause),
        (4.0, PlayerCommand::SetSpeed { speed: 1.5 }),
        (6.0, PlayerCommand::Quit),
    ];
    let sender = thread::spawn(move || {
        let mut elapsed = 0.0;
        for (at, cmd) in script {
            thread::sleep(Duration::from_secs_f64(at - elapsed));
            elapsed = at;
            info!("⌨️  发送命令: {:?}", cmd);
            if tx.send(cmd).is_err() {
                break;
            }
        }
    });

    let mut ctx = PlaybackContext::new(opts, vec![Box::new(demuxer)], backend, Box::new(input), time)
        .map_err(|e| anyhow::anyhow!("播放上下文创建失败: {}", e))?;
    let reason = ctx.play_file();
    let status = ctx.status();
    info!("📊 最终状态: {}", serde_json::to_string(&status)?);
    info!("👋 退出: {:?}", reason);

    // 关掉接收端，剩下的命令发送失败后线程退出
    drop(ctx);
    sender
        .join()
        .map_err(|_| anyhow::anyhow!("命令线程异常退出"))?;
    Ok(())
}
