//! Test suites for the render queue daemon.

#[cfg(unix)]
mod support;
