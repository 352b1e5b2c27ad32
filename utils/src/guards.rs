use std::env;
use std::ffi::{OsStr, OsString};

/// Overrides an environment variable until dropped, then puts back whatever was there.
///
/// The process environment is shared, so tests using this should be `#[serial]`.
///
/// ```no_run
/// use utils::EnvVarGuard;
///
/// let _guard = EnvVarGuard::set("UPLOADER_LOG_FORMAT", "json");
/// ```
pub struct EnvVarGuard {
    key: &'static str,
    previous: Option<OsString>,
}

impl EnvVarGuard {
    pub fn set(key: &'static str, value: impl AsRef<OsStr>) -> Self {
        Self::replace(key, Some(value.as_ref()))
    }

    pub fn remove(key: &'static str) -> Self {
        Self::replace(key, None)
    }

    fn replace(key: &'static str, value: Option<&OsStr>) -> Self {
        let previous = env::var_os(key);
        write_var(key, value);
        Self { key, previous }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        write_var(self.key, self.previous.as_deref());
    }
}

#[allow(unused_unsafe)]
fn write_var(key: &str, value: Option<&OsStr>) {
    unsafe {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }
}
