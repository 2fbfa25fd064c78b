//! Kernel print utilities.
//!
//! Kernel messages are forwarded to the [`log`] facade under the `keos`
//! target, so the embedding host decides where they end up. All macros are
//! silenced while [`QUITE`] is set.
//!
//! [`QUITE`]: crate::QUITE

#[doc(hidden)]
pub use log::Level;

#[doc(hidden)]
pub fn _log(level: Level, fmt: core::fmt::Arguments<'_>) {
    log::log!(target: "keos", level, "{fmt}");
}

/// Display an information message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::kprint::_log($crate::kprint::Level::Info, format_args!($($arg)*)) });
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::kprint::_log($crate::kprint::Level::Warn, format_args!($($arg)*)) });
}

/// Display a debug message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::kprint::_log($crate::kprint::Level::Debug, format_args!($($arg)*))} );
}
