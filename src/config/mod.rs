pub mod loader;
pub mod settings;

pub use settings::DealscopeConfig;
