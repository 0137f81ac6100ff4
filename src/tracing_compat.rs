//! Optional `tracing` integration.
//!
//! With the `tracing-integration` feature enabled, runtime events are also
//! emitted as `tracing` events at trace/warn level. When disabled, the
//! macros below compile to nothing and the dependency is not linked.

/// Emits a trace-level runtime event when `tracing-integration` is enabled.
#[cfg(feature = "tracing-integration")]
#[macro_export]
macro_rules! rt_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "weft", $($arg)*)
    };
}

/// No-op stand-in when `tracing-integration` is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[macro_export]
macro_rules! rt_trace {
    ($($arg:tt)*) => {{}};
}

/// Emits a warn-level runtime event when `tracing-integration` is enabled.
#[cfg(feature = "tracing-integration")]
#[macro_export]
macro_rules! rt_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "weft", $($arg)*)
    };
}

/// No-op stand-in when `tracing-integration` is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[macro_export]
macro_rules! rt_warn {
    ($($arg:tt)*) => {{}};
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_expand_in_either_configuration() {
        rt_trace!("fiber {} spawned", 1);
        rt_warn!("fiber {} failed", 2);
    }
}
