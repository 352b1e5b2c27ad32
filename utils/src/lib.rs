pub mod configuration_utils;

mod guards;
pub use guards::EnvVarGuard;

pub mod limited_joinset;
pub use limited_joinset::LimitedJoinSet;

// configurable_constants! is exported at the crate root by #[macro_export].
