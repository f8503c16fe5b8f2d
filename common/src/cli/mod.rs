//! CLI policy shared by the sender and receiver.
//!
//! Both binaries accept `--color`; the value type lives here so they
//! parse and apply it the same way.

mod color;

pub use color::ColorWhen;
