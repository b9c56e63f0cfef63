use color_eyre::eyre::Report;

/// Failures a caller can act on, carried inside an `eyre::Report`.
///
/// Everything else (driver errors, missing devices, unreadable files) stays an
/// opaque report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("swapchain is out of date or suboptimal")]
    SwapchainStale,
}

impl RenderError {
    pub fn invalid(msg: impl Into<String>) -> Report {
        Report::new(Self::InvalidArgument(msg.into()))
    }

    pub fn exhausted(msg: impl Into<String>) -> Report {
        Report::new(Self::ResourceExhausted(msg.into()))
    }

    /// Returns the classification carried by `report`, if any.
    pub fn of(report: &Report) -> Option<&RenderError> {
        report.downcast_ref::<RenderError>()
    }

    pub fn is_swapchain_stale(report: &Report) -> bool {
        matches!(Self::of(report), Some(RenderError::SwapchainStale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_survives_report() {
        let report = RenderError::exhausted("no free descriptor sets");
        assert!(matches!(
            RenderError::of(&report),
            Some(RenderError::ResourceExhausted(_))
        ));
        assert!(!RenderError::is_swapchain_stale(&report));

        let stale = Report::new(RenderError::SwapchainStale);
        assert!(RenderError::is_swapchain_stale(&stale));
    }

    #[test]
    fn test_context_keeps_classification() {
        use color_eyre::eyre::WrapErr;
        let result: color_eyre::Result<()> = Err(RenderError::invalid("bad count"));
        let report = result.wrap_err("while writing descriptors").unwrap_err();
        assert!(matches!(
            RenderError::of(&report),
            Some(RenderError::InvalidArgument(_))
        ));
    }
}
