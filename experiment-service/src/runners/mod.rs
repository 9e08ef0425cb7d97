// Runners Module
// Launches task implementations as local subprocesses

pub mod process;

pub use process::{parse_output_line, ProcessConfig, ProcessExit, ProcessOutput, ProcessRunner};
