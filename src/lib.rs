pub mod config;
pub mod core;
pub mod supervisor;

// Re-export main components for easy access
pub use config::HarnessConfig;
pub use self::core::*;
pub use supervisor::Supervisor;
