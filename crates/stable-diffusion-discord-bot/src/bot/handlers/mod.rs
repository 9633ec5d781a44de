use std::sync::Arc;

use async_trait::async_trait;
use serenity::{
    http::Http,
    model::{
        application::interaction::{
            application_command::ApplicationCommandInteraction, modal::ModalSubmitInteraction,
            InteractionResponseType,
        },
        id::ChannelId,
    },
};

use tracing::warn;

use super::{error::InteractionError, render::RenderedMessage};

pub(crate) mod dalle;
pub(crate) mod diffusion;

/// How an interaction ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// The generated images were sent.
    Done,
    /// The submission failed validation; nothing was sent to a backend.
    Rejected,
    /// The user never submitted the form.
    Abandoned,
    /// The backend call failed.
    Failed,
}

/// The reply surface of one interaction.
///
/// Calls follow a fixed order: `defer` first, then at most one `notice`, then
/// `reply` or `fail`, then `clear_notice` only if a notice was shown. A `reply`
/// that cannot be delivered is followed by a `fail`.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Acknowledges the interaction so the reply may take longer than the
    /// platform's response window.
    async fn defer(&self) -> anyhow::Result<()>;

    /// Replaces the deferred reply with a status text.
    async fn notice(&self, text: &str) -> anyhow::Result<()>;

    /// Replaces the deferred reply (or notice) with an error.
    async fn fail(&self, error: &InteractionError) -> anyhow::Result<()>;

    /// Sends the final result.
    async fn reply(&self, message: &RenderedMessage) -> anyhow::Result<()>;

    /// Removes the status text left by `notice`.
    async fn clear_notice(&self) -> anyhow::Result<()>;
}

/// Shown when the generated images could not be posted.
pub const UNDELIVERED: &str = "Couldn't post the images, try again.";

/// Sends the result. If Discord refuses it, the deferred reply is replaced
/// with an error instead so the user is never left waiting.
///
/// Returns whether the result was delivered.
pub(crate) async fn deliver<R>(responder: &R, message: &RenderedMessage) -> anyhow::Result<bool>
where
    R: Responder + ?Sized,
{
    match responder.reply(message).await {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!(images = message.attachments.len(), "Failed to send result: {e:#}");
            responder
                .fail(&InteractionError::Unreachable(UNDELIVERED.to_owned()))
                .await?;
            Ok(false)
        }
    }
}

/// Commands may only be used in the configured channel.
pub fn check_channel(channel: ChannelId, allowed: ChannelId) -> Result<(), InteractionError> {
    if channel == allowed {
        Ok(())
    } else {
        Err(InteractionError::WrongChannel(allowed))
    }
}

/// Replies privately to a command that was used incorrectly.
pub(crate) async fn reject_usage(
    http: &Http,
    command: &ApplicationCommandInteraction,
    error: &InteractionError,
) -> anyhow::Result<()> {
    command
        .create_interaction_response(http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| message.content(error).ephemeral(true))
        })
        .await?;
    Ok(())
}

/// Replies privately to an options form submitted after its collector stopped waiting.
pub(crate) async fn reject_late_form(
    http: &Http,
    submit: &ModalSubmitInteraction,
) -> anyhow::Result<()> {
    submit
        .create_interaction_response(http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| {
                    message
                        .content(InteractionError::FormExpired)
                        .ephemeral(true)
                })
        })
        .await?;
    Ok(())
}

#[derive(Clone, Debug)]
pub(crate) enum InteractionTarget {
    Command(Arc<ApplicationCommandInteraction>),
    Modal(Arc<ModalSubmitInteraction>),
}

/// A [`Responder`] backed by a Discord interaction.
#[derive(Clone)]
pub(crate) struct InteractionResponder {
    http: Arc<Http>,
    target: InteractionTarget,
}

impl InteractionResponder {
    pub fn new(http: Arc<Http>, target: InteractionTarget) -> Self {
        Self { http, target }
    }
}

// Both interaction kinds expose the same response methods without a common trait.
macro_rules! with_target {
    ($self:ident, $interaction:ident => $body:expr) => {
        match &$self.target {
            InteractionTarget::Command($interaction) => $body,
            InteractionTarget::Modal($interaction) => $body,
        }
    };
}

#[async_trait]
impl Responder for InteractionResponder {
    async fn defer(&self) -> anyhow::Result<()> {
        with_target!(self, i => {
            i.create_interaction_response(&self.http, |r| {
                r.kind(InteractionResponseType::DeferredChannelMessageWithSource)
            })
            .await?
        });
        Ok(())
    }

    async fn notice(&self, text: &str) -> anyhow::Result<()> {
        with_target!(self, i => {
            i.edit_original_interaction_response(&self.http, |r| r.content(text))
                .await?
        });
        Ok(())
    }

    async fn fail(&self, error: &InteractionError) -> anyhow::Result<()> {
        with_target!(self, i => {
            i.edit_original_interaction_response(&self.http, |r| r.content(error))
                .await?
        });
        Ok(())
    }

    async fn reply(&self, message: &RenderedMessage) -> anyhow::Result<()> {
        with_target!(self, i => {
            i.create_followup_message(&self.http, |m| {
                m.add_files(message.files())
                    .add_embeds(message.create_embeds())
            })
            .await?
        });
        Ok(())
    }

    async fn clear_notice(&self) -> anyhow::Result<()> {
        with_target!(self, i => {
            i.delete_original_interaction_response(&self.http).await?
        });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;
    use crate::bot::error::MAX_REPLY_CHARS;

    /// A call recorded by [`RecordingResponder`].
    #[derive(Clone, PartialEq, Eq, Debug)]
    pub enum Call {
        Defer,
        Notice(String),
        Fail(String),
        Reply(RenderedMessage),
        ClearNotice,
    }

    /// Records every call. Calls Discord would refuse fail and are not recorded.
    #[derive(Default)]
    pub struct RecordingResponder {
        pub calls: Mutex<Vec<Call>>,
        /// Refuse every `reply`, as Discord does for an oversized upload.
        pub reject_replies: bool,
    }

    impl RecordingResponder {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Calls visible to the user as a final answer.
        pub fn replies(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Fail(_) | Call::Reply(_)))
                .count()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn defer(&self) -> anyhow::Result<()> {
            self.push(Call::Defer);
            Ok(())
        }

        async fn notice(&self, text: &str) -> anyhow::Result<()> {
            self.push(Call::Notice(text.to_owned()));
            Ok(())
        }

        async fn fail(&self, error: &InteractionError) -> anyhow::Result<()> {
            let content = error.to_string();
            if content.chars().count() > MAX_REPLY_CHARS {
                bail!("Invalid Form Body: content must be 2000 or fewer in length");
            }
            self.push(Call::Fail(content));
            Ok(())
        }

        async fn reply(&self, message: &RenderedMessage) -> anyhow::Result<()> {
            if self.reject_replies {
                bail!("Request entity too large");
            }
            self.push(Call::Reply(message.clone()));
            Ok(())
        }

        async fn clear_notice(&self) -> anyhow::Result<()> {
            self.push(Call::ClearNotice);
            Ok(())
        }
    }
}
