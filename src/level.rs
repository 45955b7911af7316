/// Log severity levels, ordered from most to least verbose.
///
/// The numeric ordering is part of the record format: a level is stored as a
/// single byte and filtered with `level >= MIN_LEVEL` at the call site.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    /// The bracketed tag written at the start of each emitted line.
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Trace => "[TRACE]",
            Level::Debug => "[DEBUG]",
            Level::Info => "[INFO]",
            Level::Warn => "[WARN]",
            Level::Error => "[ERROR]",
            Level::Fatal => "[FATAL]",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Compile-time minimum level, selected by the `max-level-*` cargo features.
///
/// With no feature enabled every level is compiled in. The strictest enabled
/// feature wins, so a dependency graph that enables several of them gets the
/// quietest one.
pub const MIN_LEVEL: Level = if cfg!(feature = "max-level-error") {
    Level::Error
} else if cfg!(feature = "max-level-warn") {
    Level::Warn
} else if cfg!(feature = "max-level-info") {
    Level::Info
} else if cfg!(feature = "max-level-debug") {
    Level::Debug
} else {
    Level::Trace
};

/// Compile-time level test used by the call-site macros.
///
/// This is a `const fn` over constants, so the guard folds away entirely for
/// levels below the static minimum.
#[inline(always)]
pub const fn level_enabled(level: Level) -> bool {
    !cfg!(feature = "max-level-off") && (level as u8) >= (MIN_LEVEL as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(Level::Trace.tag(), "[TRACE]");
        assert_eq!(Level::Fatal.tag(), "[FATAL]");
    }

    #[test]
    fn test_default_min_level_enables_everything() {
        #[cfg(not(any(
            feature = "max-level-off",
            feature = "max-level-error",
            feature = "max-level-warn",
            feature = "max-level-info",
            feature = "max-level-debug"
        )))]
        assert!(level_enabled(Level::Trace));
    }
}
