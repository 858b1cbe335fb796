//! 固件烧写命令

use anyhow::{Context, Result, bail};
use clap::Args;
use mrf_driver::protocol::RobotIndex;
use mrf_driver::{Dongle, DongleConfig, FirmwareTarget, FirmwareUpload, UploadProgress, UploadStep};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// 烧写命令参数
#[derive(Args, Debug)]
pub struct UploadCommand {
    /// 机器人索引（0-7）
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..8))]
    pub robot: u8,

    /// 镜像文件
    #[arg(long)]
    pub image: PathBuf,

    /// 烧写 FPGA 比特流（默认为 PIC 固件）
    #[arg(long)]
    pub fpga: bool,
}

impl UploadCommand {
    pub fn target(&self) -> FirmwareTarget {
        if self.fpga {
            FirmwareTarget::Fpga
        } else {
            FirmwareTarget::Pic
        }
    }

    pub fn execute(&self, config: DongleConfig) -> Result<()> {
        let robot = RobotIndex::new(self.robot)?;
        let image = std::fs::read(&self.image)
            .with_context(|| format!("Failed to read image {}", self.image.display()))?;
        let mut upload = FirmwareUpload::new(robot, &image, self.target())?;
        info!(
            "Uploading {} ({} bytes, {} pages) to robot {} as {:?}",
            self.image.display(),
            image.len(),
            upload.total_pages(),
            robot,
            self.target()
        );

        let mut dongle = Dongle::open(config).context("Failed to open dongle")?;
        loop {
            match upload.step(&mut dongle) {
                Ok(UploadProgress::Done) => break,
                Ok(UploadProgress::Advanced(step)) => report(&upload, step),
                Ok(UploadProgress::Waiting(_)) => {
                    dongle.poll(Duration::from_millis(10));
                },
                Err(e) => bail!("Upload to robot {} aborted: {}", robot, e),
            }
        }
        info!("Upload to robot {} complete, robot rebooting", robot);
        Ok(())
    }
}

fn report(upload: &FirmwareUpload, step: UploadStep) {
    match step {
        UploadStep::FillPage { .. } => debug!("{} done", step),
        UploadStep::ProgramPage { page } => {
            info!("Programmed page {}/{}", page as usize + 1, upload.total_pages());
        },
        UploadStep::BlockCrc { block } => {
            info!("Verified block {}/{}", block + 1, upload.total_blocks());
        },
        other => info!("{} done", other),
    }
}
