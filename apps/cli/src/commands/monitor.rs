//! 遥测监控命令

use anyhow::{Context, Result};
use clap::Args;
use mrf_driver::protocol::RobotIndex;
use mrf_driver::{Dongle, DongleConfig, DongleEvent, Telemetry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 打印间隔（毫秒）
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,
}

impl MonitorCommand {
    pub fn execute(&self, config: DongleConfig) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
            .context("Failed to set Ctrl+C handler")?;

        let mut dongle = Dongle::open(config).context("Failed to open dongle")?;
        let events = dongle.events();
        let interval = Duration::from_millis(self.interval_ms.max(1));
        let mut next_print = Instant::now() + interval;

        info!("Monitoring, press Ctrl+C to stop");
        while running.load(Ordering::SeqCst) {
            dongle.poll(Duration::from_millis(10));

            for robot in dongle.check_feedback(Instant::now()) {
                warn!("Robot {} stopped reporting", robot);
            }
            for event in events.try_iter() {
                match event {
                    DongleEvent::AliveChanged { robot, alive: true } => {
                        info!("Robot {} is alive", robot);
                    },
                    DongleEvent::AutokickFired { robot } => info!("Robot {} autokicked", robot),
                    DongleEvent::EStopChanged(state) => info!("E-stop: {:?}", state),
                    _ => {},
                }
            }

            if Instant::now() >= next_print {
                next_print += interval;
                print_table(&dongle);
            }
        }

        let snapshot = dongle.metrics().snapshot();
        info!(
            "Inbound frames: {} ({} malformed), drive frames: {}",
            snapshot.inbound_frames, snapshot.inbound_malformed, snapshot.drive_frames_submitted
        );
        Ok(())
    }
}

fn print_table<T: mrf_driver::usb::Transport>(dongle: &Dongle<T>) {
    println!("E-stop: {:?}", dongle.estop());
    println!(
        "{:>5} {:>8} {:>8} {:>6} {:>7} {:>5} {:>6}  alerts",
        "robot", "battery", "cap", "beam", "temp", "lqi", "rssi"
    );
    for robot in RobotIndex::all() {
        let telemetry = dongle.telemetry(robot);
        if telemetry.alive {
            println!("{}", format_row(robot, telemetry));
        }
    }
}

fn format_row(robot: RobotIndex, t: &Telemetry) -> String {
    let mut alerts = Vec::new();
    if t.alerts.low_capacitor {
        alerts.push("low-cap");
    }
    if t.alerts.firmware_build_id_mismatch {
        alerts.push("fw-mismatch");
    }
    if t.alerts.fpga_build_id_mismatch {
        alerts.push("fpga-mismatch");
    }
    if t.alerts.build_id_fetch_error {
        alerts.push("no-build-id");
    }
    format!(
        "{:>5} {:>7.2}V {:>7.2}V {:>6.3} {:>6.1}C {:>5.2} {:>4}dB  {}",
        robot.get(),
        t.battery_voltage,
        t.capacitor_voltage,
        t.break_beam_reading,
        t.dribbler_temperature,
        t.link_quality,
        t.rssi_dbm,
        alerts.join(",")
    )
}
