pub mod job;
pub mod parser;
pub mod pipeline;
pub mod process;
pub mod terminal;
