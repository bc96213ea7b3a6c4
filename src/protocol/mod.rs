pub mod commands;
pub mod crc;
pub mod frame;

pub use frame::{Frame, FrameError, Parameter};
