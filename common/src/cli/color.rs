//! `--color` policy for log output.
//!
//! An explicit `always` or `never` wins. In `auto`, colors are disabled
//! by a non-empty `NO_COLOR`, by `EMACS`, or by `TERM=dumb`, and are
//! otherwise enabled only when the log stream is a TTY.

use std::env;
use std::ffi::OsString;

/// When to emit ANSI colors.
///
/// Doubles as the `--color` value for both binaries.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorWhen {
    /// Enable colors only when output is a TTY.
    #[default]
    Auto,

    /// Always enable colors.
    Always,

    /// Never enable colors.
    Never,
}

impl ColorWhen {
    // ---
    /// Returns whether ANSI color should be used for the given stream.
    pub fn should_color(self, stream: atty::Stream) -> bool {
        // ---
        self.resolve(|key| env::var_os(key), atty::is(stream))
    }

    /// Whether log output (stderr) should be colored.
    pub fn for_logs(self) -> bool {
        // ---
        self.should_color(atty::Stream::Stderr)
    }

    fn resolve<F>(self, var: F, is_tty: bool) -> bool
    where
        F: Fn(&str) -> Option<OsString>,
    {
        // ---
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => {
                let no_color = var("NO_COLOR").is_some_and(|v| !v.is_empty());
                let emacs = var("EMACS").is_some();
                let dumb = var("TERM").is_some_and(|v| v == "dumb");

                is_tty && !no_color && !emacs && !dumb
            }
        }
    }
}
