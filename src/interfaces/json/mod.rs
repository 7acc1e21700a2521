pub mod scenario_reader;
pub mod transition_writer;
