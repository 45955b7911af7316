//! Call-site macros.
//!
//! `log!` is the core form; `trace!` through `fatal!` fix the level. The
//! expansion does three things, all resolved at compile time:
//!
//! 1. tests the level against [`MIN_LEVEL`](crate::MIN_LEVEL), a constant
//!    comparison, so disabled levels compile to nothing;
//! 2. `const`-asserts the format literal is well formed and its `{}` count
//!    matches the argument count;
//! 3. defines a local decoder function with the format literal baked into
//!    its body, monomorphized over the concrete argument tuple by type
//!    inference: one decoder per `(format, argument types)` call site,
//!    whose address travels inside the record.
//!
//! Arguments are captured by reference, serialized, and not used again;
//! plain `&str` values are copied into the record. Wrap a `&'static str` in
//! [`StaticStr`](crate::StaticStr) to store just its pointer.

/// Logs a record at an explicit level.
///
/// ```
/// use deferlog::{log, Level};
///
/// log!(Level::Info, "pi={} name={}", 3.1415, "test");
/// ```
#[macro_export]
macro_rules! log {
    ($level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const __DEFERLOG_LEVEL: $crate::Level = $level;
        if $crate::level_enabled(__DEFERLOG_LEVEL) {
            const _: () = {
                assert!(
                    $crate::format::is_well_formed($fmt),
                    "malformed log format string",
                );
                assert!(
                    $crate::format::placeholder_count($fmt)
                        == 0usize $(+ { let _ = stringify!($arg); 1 })*,
                    "format placeholders do not match argument count",
                );
            };

            fn __deferlog_decode<P: $crate::codec::ArgPack>(
                args: &[u8],
                out: &mut $crate::stage::StageWriter<'_>,
            ) {
                let mut cursor = $crate::codec::Cursor::new(args);
                P::decode_format($fmt, &mut cursor, out);
            }

            #[inline(always)]
            fn __deferlog_decoder_of<P: $crate::codec::ArgPack>(
                _pack: &P,
            ) -> $crate::codec::DecodeFn {
                __deferlog_decode::<P>
            }

            let __deferlog_args = ($(&$arg,)*);
            $crate::backend::log_record(
                __DEFERLOG_LEVEL,
                __deferlog_decoder_of(&__deferlog_args),
                &__deferlog_args,
            );
        }
    }};
}

/// Logs at [`Level::Trace`](crate::Level::Trace).
#[macro_export]
macro_rules! trace {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Trace, $fmt $(, $arg)*)
    };
}

/// Logs at [`Level::Debug`](crate::Level::Debug).
#[macro_export]
macro_rules! debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Debug, $fmt $(, $arg)*)
    };
}

/// Logs at [`Level::Info`](crate::Level::Info).
#[macro_export]
macro_rules! info {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Info, $fmt $(, $arg)*)
    };
}

/// Logs at [`Level::Warn`](crate::Level::Warn).
#[macro_export]
macro_rules! warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Warn, $fmt $(, $arg)*)
    };
}

/// Logs at [`Level::Error`](crate::Level::Error).
#[macro_export]
macro_rules! error {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Error, $fmt $(, $arg)*)
    };
}

/// Logs at [`Level::Fatal`](crate::Level::Fatal).
#[macro_export]
macro_rules! fatal {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::log!($crate::Level::Fatal, $fmt $(, $arg)*)
    };
}
