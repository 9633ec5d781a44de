use serenity::model::id::ChannelId;

use super::{backend::BackendError, params::ValidationError};

/// Longest message content Discord accepts, in characters.
pub const MAX_REPLY_CHARS: usize = 2000;

/// A terminal failure of one interaction.
///
/// The `Display` output is the reply shown to the user.
#[derive(thiserror::Error, Debug)]
pub enum InteractionError {
    #[error("Wrong channel! Head to <#{0}> and try again there.")]
    WrongChannel(ChannelId),
    #[error("Looks like that wasn't a PNG or JPEG, try submitting again.")]
    UnsupportedAttachment,
    #[error("That form has expired, run the command again.")]
    FormExpired,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Whoops, looks like that prompt was caught by OpenAI's safety system. Try another one. Prompt was: {prompt}")]
    SafetyRejection { prompt: String },
    #[error("Error creating image! Status {status}, {message}")]
    Upstream { status: u16, message: String },
    #[error("Error creating image! {0}")]
    Unreachable(String),
}

impl InteractionError {
    /// Classifies a backend failure for the request that carried `prompt`.
    ///
    /// Upstream text is cut so the reply fits in a single message.
    pub fn from_backend(err: BackendError, prompt: &str) -> Self {
        let mut error = match err {
            BackendError::SafetyRejection => InteractionError::SafetyRejection {
                prompt: prompt.to_owned(),
            },
            BackendError::Upstream { status, message } => {
                InteractionError::Upstream { status, message }
            }
            BackendError::Unreachable(reason) => InteractionError::Unreachable(reason),
        };

        let reply_len = error.to_string().chars().count();
        match &mut error {
            InteractionError::SafetyRejection { prompt: text }
            | InteractionError::Upstream { message: text, .. }
            | InteractionError::Unreachable(text) => {
                *text = shorten(std::mem::take(text), reply_len);
            }
            _ => {}
        }
        error
    }
}

/// Drops the tail of `text`, which ends a reply of `reply_len` characters,
/// so the reply is at most [`MAX_REPLY_CHARS`] long.
fn shorten(text: String, reply_len: usize) -> String {
    let excess = reply_len.saturating_sub(MAX_REPLY_CHARS);
    if excess == 0 {
        return text;
    }
    let keep = text.chars().count().saturating_sub(excess + 1);
    text.chars().take(keep).chain(std::iter::once('…')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies() {
        assert_eq!(
            InteractionError::WrongChannel(ChannelId(42)).to_string(),
            "Wrong channel! Head to <#42> and try again there."
        );
        assert_eq!(
            InteractionError::FormExpired.to_string(),
            "That form has expired, run the command again."
        );
        assert_eq!(
            InteractionError::from(ValidationError::Steps("abc".to_owned())).to_string(),
            "Steps abc not valid. Needs to be between 1 and 100."
        );
        assert_eq!(
            InteractionError::from_backend(BackendError::SafetyRejection, "a bad idea").to_string(),
            "Whoops, looks like that prompt was caught by OpenAI's safety system. Try another one. Prompt was: a bad idea"
        );
        assert_eq!(
            InteractionError::from_backend(
                BackendError::Upstream {
                    status: 429,
                    message: "Rate limit reached".to_owned()
                },
                "p"
            )
            .to_string(),
            "Error creating image! Status 429, Rate limit reached"
        );
    }

    #[test]
    fn long_upstream_text_is_cut_to_one_message() {
        let err = InteractionError::from_backend(
            BackendError::Upstream {
                status: 422,
                message: "x".repeat(5000),
            },
            "p",
        );
        let reply = err.to_string();
        assert_eq!(reply.chars().count(), MAX_REPLY_CHARS);
        assert!(reply.starts_with("Error creating image! Status 422, xxx"));
        assert!(reply.ends_with("x…"));

        let reply = InteractionError::from_backend(BackendError::SafetyRejection, &"é".repeat(3000))
            .to_string();
        assert_eq!(reply.chars().count(), MAX_REPLY_CHARS);
        assert!(reply.ends_with('…'));
    }

    #[test]
    fn short_text_is_untouched() {
        let reason = "y".repeat(MAX_REPLY_CHARS - "Error creating image! ".len());
        assert_eq!(
            InteractionError::from_backend(BackendError::Unreachable(reason.clone()), "p")
                .to_string(),
            format!("Error creating image! {reason}")
        );
    }
}
