use thiserror::Error;

/// Aggregates every failure mode an engine can report.
///
/// Engines never let these escape `send_message`; each one ends up as a single
/// `on_error` call carrying the variant's display string. The typed form is still
/// returned from the lower layers (token exchange, transport, stream decoding) so
/// callers embedding those pieces directly can branch on it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required setting is missing or unusable.
    #[error("invalid configuration for {field}: {reason}")]
    Configuration {
        /// Name of the setting, such as `baiduClientId`.
        field: String,
        /// Why the setting could not be used.
        reason: String,
    },
    /// The client-credentials exchange failed.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Transport-level failure before the response stream was opened.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Transport or framing failure after the stream was opened.
    #[error("stream error: {message}")]
    Stream { message: String },
    /// Failure payload reported by the provider, already normalized to text.
    #[error("{message}")]
    Provider {
        /// Name of the engine, such as `baidu`.
        provider: &'static str,
        /// Human-readable message extracted from the provider payload.
        message: String,
    },
    /// The request body could not be built.
    #[error("invalid request: {message}")]
    Validation { message: String },
}

impl EngineError {
    /// Creates an [`EngineError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_engine::error::EngineError;
    ///
    /// let err = EngineError::transport("dns lookup failed");
    /// assert!(matches!(err, EngineError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`EngineError::Auth`].
    pub fn auth<T: Into<String>>(message: T) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates an [`EngineError::Stream`].
    pub fn stream<T: Into<String>>(message: T) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates an [`EngineError::Provider`] with the given engine name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_engine::error::EngineError;
    ///
    /// let err = EngineError::provider("baidu", "Open api qps request limit reached");
    /// assert_eq!(err.to_string(), "Open api qps request limit reached");
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`EngineError::Configuration`] for a missing or empty setting.
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Returns the trimmed value when present and non-empty, otherwise a configuration error.
pub(crate) fn require_setting(value: Option<&str>, field: &str) -> Result<String, EngineError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(EngineError::configuration(field, "value is required")),
    }
}
