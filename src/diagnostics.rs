//! User-facing diagnostics.
//!
//! Errors carry a uniform prefix so they read the same whether they come from
//! trace loading, topology validation or the expectations runner. Warnings go
//! through `tracing` so the binary's log filter controls them.

const PREFIX: &str = "sched-assert";

/// Format an error message with the tool prefix.
pub fn error_message(msg: impl AsRef<str>) -> String {
    format!("{}: error: {}", PREFIX, msg.as_ref())
}

/// Emit a warning.
pub fn warn(msg: impl AsRef<str>) {
    tracing::warn!("{}: {}", PREFIX, msg.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_is_prefixed() {
        assert_eq!(
            error_message("bad line"),
            "sched-assert: error: bad line".to_string()
        );
    }
}
