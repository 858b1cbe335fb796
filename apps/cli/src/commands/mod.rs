//! 子命令

pub mod beep;
pub mod monitor;
pub mod upload;

pub use beep::BeepCommand;
pub use monitor::MonitorCommand;
pub use upload::UploadCommand;
