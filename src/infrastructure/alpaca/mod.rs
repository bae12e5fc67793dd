pub mod broker;
pub mod symbol_resolution;

pub use broker::AlpacaBroker;
