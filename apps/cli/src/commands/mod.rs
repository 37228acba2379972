//! 命令定义和实现

pub mod config;
pub mod ping;
pub mod read;
pub mod torque;
pub mod track;

pub use config::ConfigCommand;
pub use ping::{PingCommand, ScanCommand};
pub use read::ReadCommand;
pub use torque::TorqueCommand;
pub use track::TrackCommand;
