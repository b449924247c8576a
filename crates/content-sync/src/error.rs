/// Errors that can occur during a sync cycle.
///
/// The variants follow how far a failure is allowed to propagate:
/// `Unavailable` stops a cycle before any side effects, the transfer and
/// filesystem variants are scoped to a single file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Catalog or network unreachable. Always recoverable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Network or stream error mid-download. Recoverable by resuming.
    #[error("transfer interrupted: {0}")]
    TransientTransfer(String),

    /// The content origin rejected the request for good.
    #[error("transfer rejected: {0}")]
    PermanentTransfer(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn filesystem(context: &str, err: &std::io::Error) -> Self {
        Self::Filesystem(format!("{context}: {err}"))
    }

    /// True if retrying later (possibly after a resume) can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TransientTransfer(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentTransfer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(SyncError::Unavailable("offline".into()).is_recoverable());
        assert!(SyncError::TransientTransfer("reset".into()).is_recoverable());
        assert!(!SyncError::PermanentTransfer("403".into()).is_recoverable());
        assert!(!SyncError::Filesystem("disk full".into()).is_recoverable());
    }

    #[test]
    fn filesystem_helper_includes_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SyncError::filesystem("opening ad1.mp4.download", &io);
        assert_eq!(
            err.to_string(),
            "filesystem error: opening ad1.mp4.download: denied"
        );
    }
}
