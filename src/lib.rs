pub mod billing;
pub mod core;
pub mod learn;
pub mod main_module;

pub use self::core::shared;
