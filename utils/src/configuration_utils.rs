use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

/// A trait to control how a value is parsed from an environment string if it's present.
pub trait ParsableConfigValue: std::fmt::Debug + Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    /// Parse the value, returning the default if it can't be parsed or isn't set.
    /// Issue a warning if it can't be parsed.
    fn parse(variable_name: &str, value: Option<String>, default: Self) -> Self {
        match value {
            Some(v) => match Self::parse_user_value(&v) {
                Some(v) => {
                    info!("Config: {variable_name} = {v:?} (user set)");
                    v
                },
                None => {
                    warn!(
                        "Configuration value {v} for {variable_name} cannot be parsed into correct type; reverting to default."
                    );
                    info!("Config: {variable_name} = {default:?} (default due to parse error)");
                    default
                },
            },
            None => {
                debug!("Config: {variable_name} = {default:?} (default)");
                default
            },
        }
    }
}

/// Most values work with the FromStr implementation; bool, Option<T> and Duration get
/// their own parsing below.
pub trait FromStrParseable: FromStr + std::fmt::Debug {}

impl<T: FromStrParseable> ParsableConfigValue for T {
    fn parse_user_value(value: &str) -> Option<Self> {
        value.trim().parse::<T>().ok()
    }
}

impl FromStrParseable for usize {}
impl FromStrParseable for u16 {}
impl FromStrParseable for u32 {}
impl FromStrParseable for u64 {}
impl FromStrParseable for i64 {}
impl FromStrParseable for f64 {}
impl FromStrParseable for String {}

/// - true: "1","true","yes","y","on"
/// - false: "0","false","no","n","off"
fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "0" | "false" | "no" | "n" | "off" => Some(false),
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        _ => None,
    }
}

impl ParsableConfigValue for bool {
    fn parse_user_value(value: &str) -> Option<Self> {
        parse_bool_value(value)
    }
}

/// Lets the default be None while a user-set value appears as Some(value).
impl<T: ParsableConfigValue> ParsableConfigValue for Option<T> {
    fn parse_user_value(value: &str) -> Option<Self> {
        T::parse_user_value(value).map(Some)
    }
}

/// Accepts the suffixes understood by the duration_str crate, e.g. "500ms", "3s", "1m".
impl ParsableConfigValue for Duration {
    fn parse_user_value(value: &str) -> Option<Self> {
        duration_str::parse(value.trim()).ok()
    }
}

// Reexport so that dependent crates don't need lazy_static as a direct dependency.
pub use lazy_static::lazy_static;

/// Declares lazily-initialized constants that may be overridden from the environment.
///
/// Each `ref NAME: T = default;` reads `UPLOADER_NAME` the first time it is accessed.
///
/// # Example
/// ```rust
/// utils::configurable_constants! {
///     /// Number of bytes per part.
///     ref EXAMPLE_PART_SIZE: u64 = 5 * 1024 * 1024;
/// }
///
/// assert_eq!(*EXAMPLE_PART_SIZE, 5 * 1024 * 1024);
/// ```
#[macro_export]
macro_rules! configurable_constants {
    ($(
        $(#[$meta:meta])*
        ref $name:ident : $type:ty = $value:expr;
    )+) => {
        $(
            #[allow(unused_imports)]
            use $crate::configuration_utils::*;

            lazy_static! {
                $(#[$meta])*
                pub static ref $name: $type = {
                    let default_value: $type = $value;
                    let maybe_env_value = std::env::var(concat!("UPLOADER_", stringify!($name))).ok();
                    <$type>::parse(stringify!($name), maybe_env_value, default_value)
                };
            }
        )+
    };
}
