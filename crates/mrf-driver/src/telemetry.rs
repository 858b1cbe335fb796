//! 机器人遥测
//!
//! 只由上行路由更新，对外只读。

use mrf_protocol::GeneralStatus;

/// 电容电压低于此值时告警（伏）
pub const LOW_CAPACITOR_THRESHOLD: f64 = 5.0;

/// 告警标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RobotAlerts {
    /// 电容电压过低
    pub low_capacitor: bool,
    /// 固件构建 ID 与多数机器人不一致
    pub firmware_build_id_mismatch: bool,
    /// FPGA 构建 ID 与多数机器人不一致
    pub fpga_build_id_mismatch: bool,
    /// 多次请求后仍未获得构建 ID
    pub build_id_fetch_error: bool,
}

impl RobotAlerts {
    pub fn any(&self) -> bool {
        self.low_capacitor
            || self.firmware_build_id_mismatch
            || self.fpga_build_id_mismatch
            || self.build_id_fetch_error
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 单个机器人的遥测记录
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    /// 最近收到过状态反馈
    pub alive: bool,
    /// 电池电压（伏）
    pub battery_voltage: f64,
    /// 电容电压（伏）
    pub capacitor_voltage: f64,
    /// 对射读数（伏）
    pub break_beam_reading: f64,
    /// 盘带器温度（℃）
    pub dribbler_temperature: f64,
    /// 球在对射区内
    pub ball_in_beam: bool,
    /// 电容已充满
    pub capacitor_charged: bool,
    /// 链路质量（0.0-1.0）
    pub link_quality: f64,
    /// 信号强度（dBm）
    pub rssi_dbm: i8,
    /// `firmware_build_id` 和 `fpga_build_id` 有效
    pub build_ids_valid: bool,
    pub firmware_build_id: u32,
    pub fpga_build_id: u32,
    pub alerts: RobotAlerts,
}

impl Telemetry {
    /// 应用一次完整的状态反馈
    pub(crate) fn apply_status(&mut self, status: &GeneralStatus) {
        self.battery_voltage = status.battery_voltage();
        self.capacitor_voltage = status.capacitor_voltage();
        self.break_beam_reading = status.break_beam_reading();
        self.dribbler_temperature = status.dribbler_temperature();
        self.ball_in_beam = status.status.ball_in_beam();
        self.capacitor_charged = status.status.capacitor_charged();
        self.alerts.low_capacitor = self.capacitor_voltage < LOW_CAPACITOR_THRESHOLD;
    }

    /// 失去联系：无效化构建 ID 并清除全部告警
    pub(crate) fn mark_dead(&mut self) {
        self.alive = false;
        self.build_ids_valid = false;
        self.alerts.clear();
    }
}

/// 在有效记录中取众数，计数相同时取较大的值
pub(crate) fn majority(values: impl Iterator<Item = u32>) -> Option<u32> {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(value, count)| (count, value))
        .map(|(value, _)| value)
}
