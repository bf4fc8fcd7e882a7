pub mod instance;
pub mod monitor;
pub mod select;
