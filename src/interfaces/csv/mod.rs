//! CSV scenario replay: steps in, ride report out.

pub mod ride_writer;
pub mod scenario_reader;
pub mod scenario_runner;
