use anyhow::Context as _;
use serenity::{
    builder::CreateApplicationCommand,
    http::Http,
    model::{
        application::{
            command::{Command, CommandOptionType},
            interaction::application_command::{CommandDataOption, CommandDataOptionValue},
        },
        channel::Attachment,
        id::GuildId,
    },
};
use tracing::info;

use super::{backend::MAX_HOSTED_IMAGES, error::InteractionError, model::Model};

pub const DALLE: &str = "dalle";
pub const TEXT2IMG: &str = "text2img";
pub const IMG2IMG: &str = "img2img";

pub const PROMPT_OPTION: &str = "prompt";
pub const NUM_OPTION: &str = "num";
pub const MODEL_OPTION: &str = "model";
pub const IMAGE_OPTION: &str = "image";

const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["image/png", "image/jpeg"];

/// Every slash command the bot registers.
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_dalle_command(),
        create_text2img_command(),
        create_img2img_command(),
    ]
}

fn create_dalle_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name(DALLE)
        .description("Takes a prompt and generates an image using OpenAI's DALL-E.")
        .create_option(|option| {
            option
                .name(PROMPT_OPTION)
                .description("Prompt for image generation.")
                .kind(CommandOptionType::String)
                .required(true)
        })
        .create_option(|option| {
            option
                .name(NUM_OPTION)
                .description("Number of images to generate.")
                .kind(CommandOptionType::Integer)
                .required(true)
                .min_int_value(1)
                .max_int_value(MAX_HOSTED_IMAGES)
        })
        .to_owned()
}

fn create_text2img_command() -> CreateApplicationCommand {
    let mut command = CreateApplicationCommand::default();
    command
        .name(TEXT2IMG)
        .description("Text to image locally. Can choose models and adjust parameters freely.")
        .create_option(|option| {
            option
                .name(MODEL_OPTION)
                .description("The model to use. Look them up for examples.")
                .kind(CommandOptionType::String)
                .required(true);
            for model in Model::ALL {
                option.add_string_choice(model, model);
            }
            option
        });
    command
}

fn create_img2img_command() -> CreateApplicationCommand {
    let mut command = CreateApplicationCommand::default();
    command
        .name(IMG2IMG)
        .description("Image to image using a prompt. Can choose models and adjust parameters freely.")
        .create_option(|option| {
            option
                .name(MODEL_OPTION)
                .description("The model to use. Look them up for examples.")
                .kind(CommandOptionType::String)
                .required(true);
            for model in Model::ALL {
                option.add_string_choice(model, model);
            }
            option
        })
        .create_option(|option| {
            option
                .name(IMAGE_OPTION)
                .description("The image to base your new image from.")
                .kind(CommandOptionType::Attachment)
                .required(true)
        });
    command
}

/// Registers the commands for one guild if given, globally otherwise.
pub async fn register_commands(http: &Http, guild_id: Option<GuildId>) -> anyhow::Result<()> {
    let commands = create_commands();
    match guild_id {
        Some(guild_id) => {
            guild_id
                .set_application_commands(http, |c| c.set_application_commands(commands))
                .await
                .with_context(|| format!("Failed to register commands for guild {guild_id}"))?;
            info!(%guild_id, "Registered guild commands");
        }
        None => {
            Command::set_global_application_commands(http, |c| {
                c.set_application_commands(commands)
            })
            .await
            .context("Failed to register global commands")?;
            info!("Registered global commands");
        }
    }
    Ok(())
}

pub fn get_string_option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_ref())
        .and_then(|val| val.as_str())
}

pub fn get_integer_option(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_ref())
        .and_then(|val| val.as_i64())
}

pub fn get_attachment_option<'a>(
    options: &'a [CommandDataOption],
    name: &str,
) -> Option<&'a Attachment> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| match &opt.resolved {
            Some(CommandDataOptionValue::Attachment(attachment)) => Some(attachment),
            _ => None,
        })
}

/// Only PNG and JPEG sources are accepted for image to image.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), InteractionError> {
    match content_type {
        Some(kind) if ACCEPTED_CONTENT_TYPES.contains(&kind) => Ok(()),
        _ => Err(InteractionError::UnsupportedAttachment),
    }
}
