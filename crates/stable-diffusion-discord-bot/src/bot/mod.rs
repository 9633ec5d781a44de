use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context as _};
use serenity::{
    async_trait,
    model::{
        application::interaction::{
            application_command::ApplicationCommandInteraction, Interaction,
        },
        gateway::{Activity, Ready},
        id::{ChannelId, GuildId},
    },
    prelude::*,
};
use tracing::{debug, error, info, warn};

mod backend;
mod commands;
mod error;
mod handlers;
mod modal;
mod model;
mod params;
mod render;
mod request;
mod status;

pub use backend::{BackendError, DiffusionBackend, GenerationResult, HostedImageBackend};
pub use error::InteractionError;
pub use model::{Model, ModelProfile};
pub use params::{GenParams, RawParams, Sampler, ValidationError};
pub use request::{GenerationRequest, SourceImage};
pub use status::ModelStatus;

use handlers::{
    dalle::{self, HostedRequest},
    diffusion::{self, DiffusionContext, Submission},
    InteractionResponder, InteractionTarget, Outcome,
};
use modal::{ExpiredForms, ModalId};

/// Grouping URL shared by embeds that have no source image to link to.
pub const DEFAULT_GROUP_URL: &str =
    "https://cdn.discordapp.com/attachments/990567237071015946/990567769537937428/ezgif.com-gif-maker.gif";

/// Struct to run a StableDiffusionBot
pub struct StableDiffusionBot {
    client: Client,
}

impl StableDiffusionBot {
    /// Connects to the gateway and handles interactions until the connection ends.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.client
            .start()
            .await
            .context("Discord client stopped with an error")
    }
}

#[derive(Clone)]
pub(crate) struct ConfigParameters {
    channel_id: ChannelId,
    guild_id: Option<GuildId>,
    group_url: String,
    diffusion: Arc<dyn DiffusionBackend>,
    hosted: Arc<dyn HostedImageBackend>,
    status: ModelStatus,
}

/// Struct that builds a StableDiffusionBot instance.
pub struct StableDiffusionBotBuilder {
    discord_token: String,
    openai_api_key: String,
    channel_id: u64,
    sd_api_url: String,
    guild_id: Option<u64>,
    group_url: Option<String>,
}

impl StableDiffusionBotBuilder {
    /// Constructor that returns a new StableDiffusionBotBuilder instance.
    pub fn new(
        discord_token: String,
        openai_api_key: String,
        channel_id: u64,
        sd_api_url: String,
    ) -> Self {
        StableDiffusionBotBuilder {
            discord_token,
            openai_api_key,
            channel_id,
            sd_api_url,
            guild_id: None,
            group_url: None,
        }
    }

    /// Builder function that registers commands for a single guild instead of globally.
    ///
    /// Guild commands show up immediately, which is handy while testing.
    ///
    /// # Examples
    ///
    /// ```
    /// # use stable_diffusion_discord_bot::StableDiffusionBotBuilder;
    /// let builder = StableDiffusionBotBuilder::new(
    ///     "token".to_string(),
    ///     "sk-key".to_string(),
    ///     1234,
    ///     "http://localhost:7860".to_string(),
    /// )
    /// .guild_id(Some(5678));
    /// ```
    pub fn guild_id(mut self, guild_id: Option<u64>) -> Self {
        self.guild_id = guild_id;
        self
    }

    /// Builder function that sets the URL embeds are grouped under.
    pub fn group_url(mut self, group_url: Option<String>) -> Self {
        self.group_url = group_url;
        self
    }

    fn parameters(&self) -> anyhow::Result<ConfigParameters> {
        let client = reqwest::Client::new();

        let diffusion =
            stable_diffusion_api::Api::new_with_client_and_url(client.clone(), &self.sd_api_url)
                .context("Failed to initialize sd api")?;
        let hosted = dalle_api::Api::new_with_client_and_url(
            client,
            dalle_api::DEFAULT_URL,
            self.openai_api_key.clone(),
        )
        .context("Failed to initialize image api")?;

        Ok(ConfigParameters {
            channel_id: ChannelId(self.channel_id),
            guild_id: self.guild_id.map(GuildId),
            group_url: self
                .group_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GROUP_URL.to_owned()),
            diffusion: Arc::new(diffusion),
            hosted: Arc::new(hosted),
            status: ModelStatus::new(),
        })
    }

    /// Consumes the builder and builds a `StableDiffusionBot` instance.
    pub async fn build(self) -> anyhow::Result<StableDiffusionBot> {
        let config = self.parameters()?;

        let handler = Handler {
            config,
            presence_started: AtomicBool::new(false),
            expired_forms: ExpiredForms::default(),
        };

        let client = Client::builder(&self.discord_token, GatewayIntents::GUILDS)
            .event_handler(handler)
            .await
            .context("Failed to create Discord client")?;

        Ok(StableDiffusionBot { client })
    }
}

struct Handler {
    config: ConfigParameters,
    presence_started: AtomicBool,
    expired_forms: ExpiredForms,
}

impl Handler {
    /// Mirrors the loaded model into the bot's presence for as long as the
    /// gateway connection lives.
    fn spawn_presence_task(&self, ctx: &Context) {
        if self.presence_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut loaded = self.config.status.subscribe();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            while loaded.changed().await.is_ok() {
                let model = *loaded.borrow_and_update();
                if let Some(model) = model {
                    ctx.set_activity(Activity::playing(status::presence_text(model)))
                        .await;
                }
            }
        });
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        command: Arc<ApplicationCommandInteraction>,
    ) -> anyhow::Result<Outcome> {
        if let Err(e) = handlers::check_channel(command.channel_id, self.config.channel_id) {
            info!(channel = %command.channel_id, "Command used outside the allowed channel");
            handlers::reject_usage(&ctx.http, &command, &e).await?;
            return Ok(Outcome::Rejected);
        }

        match command.data.name.as_str() {
            commands::DALLE => self.handle_dalle(ctx, command).await,
            commands::TEXT2IMG => {
                self.handle_diffusion(ctx, command, modal::TEXT2IMG_TIMEOUT)
                    .await
            }
            commands::IMG2IMG => {
                self.handle_diffusion(ctx, command, modal::IMG2IMG_TIMEOUT)
                    .await
            }
            other => Err(anyhow!("Unknown command: {other}")),
        }
    }

    async fn handle_dalle(
        &self,
        ctx: &Context,
        command: Arc<ApplicationCommandInteraction>,
    ) -> anyhow::Result<Outcome> {
        let options = &command.data.options;
        let prompt = commands::get_string_option(options, commands::PROMPT_OPTION)
            .context("Missing prompt option")?;
        let count = commands::get_integer_option(options, commands::NUM_OPTION)
            .context("Missing num option")?;
        let request = HostedRequest::new(prompt, count, command.user.tag());

        let responder =
            InteractionResponder::new(ctx.http.clone(), InteractionTarget::Command(command));
        dalle::run(
            request,
            &responder,
            self.config.hosted.as_ref(),
            &self.config.group_url,
        )
        .await
    }

    async fn handle_diffusion(
        &self,
        ctx: &Context,
        command: Arc<ApplicationCommandInteraction>,
        timeout: Duration,
    ) -> anyhow::Result<Outcome> {
        let options = &command.data.options;
        let model: Model = commands::get_string_option(options, commands::MODEL_OPTION)
            .context("Missing model option")?
            .parse()?;

        let source = match command.data.name.as_str() {
            commands::IMG2IMG => {
                let attachment = commands::get_attachment_option(options, commands::IMAGE_OPTION)
                    .context("Missing image option")?;
                if let Err(e) = commands::check_content_type(attachment.content_type.as_deref()) {
                    info!(content_type = ?attachment.content_type, "Unsupported source image");
                    handlers::reject_usage(&ctx.http, &command, &e).await?;
                    return Ok(Outcome::Rejected);
                }
                Some(Arc::new(attachment.clone()) as Arc<dyn backend::ImageSource>)
            }
            _ => None,
        };

        let id = ModalId {
            model,
            interaction_id: command.id,
        };
        modal::show(ctx, &command, id)
            .await
            .context("Failed to show options form")?;

        let Some(submitted) = modal::collect(ctx, command.user.id, id, timeout).await else {
            self.expired_forms.mark(id).await;
            let responder =
                InteractionResponder::new(ctx.http.clone(), InteractionTarget::Command(command));
            return diffusion::run(None, &responder, self.diffusion_context()).await;
        };

        let submission = Submission {
            model,
            raw: modal::raw_params(&submitted.data.components),
            user_tag: submitted.user.tag(),
            source,
        };
        let responder =
            InteractionResponder::new(ctx.http.clone(), InteractionTarget::Modal(submitted));
        diffusion::run(Some(submission), &responder, self.diffusion_context()).await
    }

    fn diffusion_context(&self) -> DiffusionContext<'_> {
        DiffusionContext {
            backend: self.config.diffusion.as_ref(),
            status: &self.config.status,
            group_url: &self.config.group_url,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected", ready.user.name);

        if let Err(e) = commands::register_commands(&ctx.http, self.config.guild_id).await {
            error!("Failed to register commands: {e:#}");
        }
        self.spawn_presence_task(&ctx);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::ApplicationCommand(command) => {
                let name = command.data.name.clone();
                let user = command.user.tag();
                match self.handle_command(&ctx, Arc::new(command)).await {
                    Ok(outcome) => debug!(command = %name, %user, ?outcome, "Interaction finished"),
                    Err(e) => error!(command = %name, %user, "Error handling command: {e:#}"),
                }
            }
            Interaction::ModalSubmit(submit) => {
                // Options forms submitted in time are picked up by their collectors.
                let Ok(id) = submit.data.custom_id.parse::<ModalId>() else {
                    warn!(custom_id = %submit.data.custom_id, "Unhandled modal submission");
                    return;
                };
                if self.expired_forms.take(id).await {
                    info!(user = %submit.user.tag(), %id, "Options form submitted after it expired");
                    if let Err(e) = handlers::reject_late_form(&ctx.http, &submit).await {
                        error!("Failed to reply to expired form: {e:#}");
                    }
                }
            }
            other => debug!("Unhandled interaction: {:?}", other.kind()),
        }
    }
}
