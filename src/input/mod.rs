pub mod generator;
pub mod jsonl;

pub use generator::TrafficGenerator;
pub use jsonl::JsonlReader;
