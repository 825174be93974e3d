use thiserror::Error;

/**
 * \brief Errors surfaced by adapters, the factory and the import codec.
 * \details Storage failures are not part of this taxonomy; they travel as `anyhow::Error`.
 */
#[derive(Debug, Error)]
pub enum ChatError {
    /** \brief Required fields for the active provider are missing. */
    #[error("Please configure {0} settings first")]
    ConfigInvalid(String),
    /** \brief The adapter has no client because credentials are missing. */
    #[error("{0} client not initialized. Please check your configuration.")]
    ProviderUnavailable(String),
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    /** \brief Transport failure or non-success response from the vendor API. */
    #[error("Error calling {provider} API: {message}")]
    Upstream { provider: String, message: String },
    #[error("Invalid import document: {0}")]
    ImportParse(String),
}

impl ChatError {
    pub(crate) fn upstream(provider: &str, message: impl Into<String>) -> Self {
        ChatError::Upstream {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /**
     * \brief True for the errors that should send the user back to the configuration form.
     */
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ChatError::ConfigInvalid(_) | ChatError::ProviderUnavailable(_)
        )
    }
}
