//! Shell executor — runs a command line under `sh -c`, or `su -c` when
//! privilege is requested, with captured output and a hard timeout.
//!
//! This is the lowest rung of the strategy stack: shell-driven input,
//! capture, hierarchy, and the whole `app.*` family sit on top of it. The
//! [`Shell`] trait is the seam tests and alternative platforms plug into.

mod exec;

pub use exec::{probe_privileged, Shell, ShellOutput, SystemShell};
