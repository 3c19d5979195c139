pub mod clamav;
pub mod command;

pub use clamav::ClamdDetector;
pub use command::{CommandDetector, ScratchDir};
