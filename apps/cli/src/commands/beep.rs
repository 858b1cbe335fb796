use anyhow::{Context, Result};
use clap::Args;
use mrf_driver::{Dongle, DongleConfig};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 蜂鸣命令参数
#[derive(Args, Debug)]
pub struct BeepCommand {
    /// 蜂鸣时长（毫秒）
    #[arg(long, default_value_t = 500)]
    pub ms: u16,
}

impl BeepCommand {
    pub fn execute(&self, config: DongleConfig) -> Result<()> {
        let mut dongle = Dongle::open(config).context("Failed to open dongle")?;
        dongle.beep(self.ms);

        // 等待控制请求完成
        let deadline = Instant::now() + Duration::from_secs(2);
        while dongle.beep_pending() {
            if Instant::now() >= deadline {
                warn!("Beep request still pending, giving up");
                return Ok(());
            }
            dongle.poll(Duration::from_millis(20));
        }
        info!("Beeped for {} ms", self.ms);
        Ok(())
    }
}
