use crate::channels::ChannelError;
use crate::fetch::FetchError;
use crate::imaging::ImagingError;
use crate::resources::DownloadError;
use thiserror::Error;

/// Failure at the command / selection-resolver boundary.
///
/// Every variant maps to exactly one user-visible message; nothing of this
/// type is allowed to escape to the host dispatcher.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Missing or invalid prompt, argument or selection
    #[error("{0}")]
    UserInput(String),

    #[error("remote request failed: {0}")]
    RemoteFetch(#[from] FetchError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    /// Broken internal state, e.g. a payload that does not match its kind
    #[error("internal error: {0}")]
    Internal(String),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Any of the above with command-specific wording for the user
    #[error("{message} ({source})")]
    Reported {
        message: String,
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Text shown to the user for this failure
    pub fn user_message(&self) -> String {
        match self {
            Self::UserInput(message) => message.clone(),
            Self::RemoteFetch(e) => format!("❌ Request failed: {}.", e.hint()),
            Self::Download(DownloadError::Fetch(e)) => {
                format!("❌ Failed to download media: {}.", e.hint())
            }
            Self::Download(DownloadError::Io(_)) => "❌ Failed to download media.".to_string(),
            Self::Imaging(_) => "❌ Failed to process the images.".to_string(),
            Self::Internal(_) | Self::Channel(_) => "❌ Something went wrong. Please try again later.".to_string(),
            Self::Reported { message, source } => match source.fetch_error() {
                Some(e) => format!("{}\n({})", message, e.hint()),
                None => message.clone(),
            },
        }
    }

    /// Underlying remote failure, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::RemoteFetch(e) | Self::Download(DownloadError::Fetch(e)) => Some(e),
            Self::Reported { source, .. } => source.fetch_error(),
            _ => None,
        }
    }
}

/// Attach command-specific user wording to a failure
pub trait ReportExt<T> {
    fn report(self, message: &str) -> Result<T, CommandError>;
}

impl<T, E: Into<CommandError>> ReportExt<T> for Result<T, E> {
    fn report(self, message: &str) -> Result<T, CommandError> {
        self.map_err(|e| match e.into() {
            // input problems already carry their own wording
            CommandError::UserInput(text) => CommandError::UserInput(text),
            other => CommandError::Reported {
                message: message.to_string(),
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(CommandError::user_input("❌ Provide a prompt.").user_message(), "❌ Provide a prompt.");

        let timeout = CommandError::from(FetchError::Timeout);
        assert!(timeout.user_message().contains("too long"));

        let internal = CommandError::internal("payload mismatch");
        assert!(!internal.user_message().contains("payload"));
    }

    #[test]
    fn test_report_wording() {
        let failed: Result<(), FetchError> = Err(FetchError::ServerError(502));
        let err = failed.report("❌ Lyrics lookup failed.").unwrap_err();
        assert_eq!(
            err.user_message(),
            "❌ Lyrics lookup failed.\n(the service is having problems)"
        );
        assert_eq!(err.fetch_error(), Some(&FetchError::ServerError(502)));

        let input: Result<(), CommandError> = Err(CommandError::user_input("❌ No results found."));
        assert_eq!(input.report("❌ Other.").unwrap_err().user_message(), "❌ No results found.");

        let internal: Result<(), CommandError> = Err(CommandError::internal("x"));
        assert_eq!(internal.report("❌ Action failed.").unwrap_err().user_message(), "❌ Action failed.");
    }
}
