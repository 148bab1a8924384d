#![forbid(unsafe_code)]

//! Error types for host capabilities, guard lifecycle and configuration.

/// Failure reported by a [`crate::host::Host`] capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The platform does not offer this capability at all.
    Unsupported(&'static str),
    /// The platform offered the capability but refused the request.
    Rejected(String),
    /// A node or object the operation needs is not present.
    Missing(&'static str),
}

impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Missing(what) => write!(f, "missing: {what}"),
        }
    }
}

impl std::error::Error for HostError {}

/// Lifecycle error returned by [`crate::ProtectionGuard`].
#[derive(Debug)]
pub enum GuardError {
    /// `mount` was called while the guard was already mounted.
    AlreadyMounted,
    /// `unmount` was called while the guard was not mounted.
    NotMounted,
    /// The configuration failed validation at mount time.
    Config(ConfigError),
    /// A required host operation failed during mount; everything installed
    /// so far has been rolled back.
    Host(HostError),
}

impl core::fmt::Display for GuardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMounted => write!(f, "protection guard is already mounted"),
            Self::NotMounted => write!(f, "protection guard is not mounted"),
            Self::Config(err) => write!(f, "invalid guard configuration: {err}"),
            Self::Host(err) => write!(f, "host operation failed during mount: {err}"),
        }
    }
}

impl std::error::Error for GuardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Host(err) => Some(err),
            Self::AlreadyMounted | Self::NotMounted => None,
        }
    }
}

impl From<HostError> for GuardError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

impl From<ConfigError> for GuardError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Configuration loading or validation error.
#[derive(Debug)]
pub enum ConfigError {
    /// JSON parse error.
    Json(serde_json::Error),
    /// TOML parse error.
    #[cfg(feature = "toml")]
    Toml(toml::de::Error),
    /// Unknown profile name.
    UnknownProfile(String),
    /// One entry per failed validation rule.
    Validation(Vec<String>),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "JSON parse error: {err}"),
            #[cfg(feature = "toml")]
            Self::Toml(err) => write!(f, "TOML parse error: {err}"),
            Self::UnknownProfile(name) => write!(f, "unknown profile: {name}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            #[cfg(feature = "toml")]
            Self::Toml(err) => Some(err),
            Self::UnknownProfile(_) | Self::Validation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_join_in_display() {
        let err = ConfigError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "validation errors: a; b");
    }

    #[test]
    fn guard_error_wraps_host_error_as_source() {
        let err = GuardError::from(HostError::Missing("document.body"));
        assert_eq!(
            err.to_string(),
            "host operation failed during mount: missing: document.body"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
