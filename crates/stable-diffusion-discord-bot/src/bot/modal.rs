use std::{collections::VecDeque, fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context as _};
use serenity::{
    collector::CollectModalInteraction,
    model::{
        application::{
            component::{ActionRow, ActionRowComponent, InputTextStyle},
            interaction::{
                application_command::ApplicationCommandInteraction,
                modal::ModalSubmitInteraction, InteractionResponseType,
            },
        },
        id::{InteractionId, UserId},
    },
    prelude::Context,
};
use tokio::sync::Mutex;

use super::{
    model::Model,
    params::{RawParams, CFG_SCALE_RANGE, DEFAULT_CFG_SCALE, DEFAULT_STEPS, STEPS_RANGE},
};

pub const TITLE: &str = "Advanced Options";
pub const TEXT2IMG_TIMEOUT: Duration = Duration::from_secs(120);
pub const IMG2IMG_TIMEOUT: Duration = Duration::from_secs(60);

const ID_PREFIX: &str = "advanced_options";
const MAX_PROMPT_LENGTH: u64 = 1000;
const REMEMBERED_EXPIRED_FORMS: usize = 64;
// Settings are echoed back in validation errors.
const MAX_SETTING_LENGTH: u64 = 20;

const PROMPT_INPUT: &str = "prompt";
const NEGATIVE_PROMPT_INPUT: &str = "negative_prompt";
const CFG_SCALE_INPUT: &str = "cfg_scale";
const SAMPLER_INPUT: &str = "sampler";
const STEPS_INPUT: &str = "steps";

/// Identifies one modal: the model it was opened for and the command that opened it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModalId {
    pub model: Model,
    pub interaction_id: InteractionId,
}

impl fmt::Display for ModalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ID_PREFIX}|{}|{}", self.model, self.interaction_id)
    }
}

impl FromStr for ModalId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ID_PREFIX), Some(model), Some(id), None) => Ok(ModalId {
                model: model.parse()?,
                interaction_id: InteractionId(id.parse().context("Invalid interaction id")?),
            }),
            _ => Err(anyhow!("Not an options modal: {s}")),
        }
    }
}

/// Responds to `command` with the options form.
pub async fn show(
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    id: ModalId,
) -> serenity::Result<()> {
    let cfg_hint = format!(
        "Between {} and {}. Default is {DEFAULT_CFG_SCALE}.",
        CFG_SCALE_RANGE.start(),
        CFG_SCALE_RANGE.end()
    );
    let steps_hint = format!(
        "Between {} and {}. Default is {DEFAULT_STEPS}.",
        STEPS_RANGE.start(),
        STEPS_RANGE.end()
    );

    command
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::Modal)
                .interaction_response_data(|modal| {
                    modal.custom_id(id).title(TITLE).components(|c| {
                        c.create_action_row(|row| {
                            row.create_input_text(|input| {
                                input
                                    .custom_id(PROMPT_INPUT)
                                    .label("Prompt")
                                    .style(InputTextStyle::Paragraph)
                                    .placeholder("Prompt to generate a picture from.")
                                    .required(true)
                                    .max_length(MAX_PROMPT_LENGTH)
                            })
                        })
                        .create_action_row(|row| {
                            row.create_input_text(|input| {
                                input
                                    .custom_id(NEGATIVE_PROMPT_INPUT)
                                    .label("Negative Prompt")
                                    .style(InputTextStyle::Paragraph)
                                    .placeholder(
                                        "Negative prompt - stuff you don't want to see in your image.",
                                    )
                                    .required(false)
                                    .max_length(MAX_PROMPT_LENGTH)
                            })
                        })
                        .create_action_row(|row| {
                            row.create_input_text(|input| {
                                input
                                    .custom_id(CFG_SCALE_INPUT)
                                    .label("CFG scale")
                                    .style(InputTextStyle::Short)
                                    .placeholder(&cfg_hint)
                                    .required(false)
                                    .max_length(MAX_SETTING_LENGTH)
                            })
                        })
                        .create_action_row(|row| {
                            row.create_input_text(|input| {
                                input
                                    .custom_id(SAMPLER_INPUT)
                                    .label("Sampler")
                                    .style(InputTextStyle::Short)
                                    .placeholder("LMS, Euler a, Euler or DPM2. Default is Euler a.")
                                    .required(false)
                                    .max_length(MAX_SETTING_LENGTH)
                            })
                        })
                        .create_action_row(|row| {
                            row.create_input_text(|input| {
                                input
                                    .custom_id(STEPS_INPUT)
                                    .label("Steps")
                                    .style(InputTextStyle::Short)
                                    .placeholder(&steps_hint)
                                    .required(false)
                                    .max_length(MAX_SETTING_LENGTH)
                            })
                        })
                    })
                })
        })
        .await
}

/// Waits for `user` to submit the modal identified by `id`.
///
/// Returns `None` when the window elapses, e.g. because the user closed the form.
pub async fn collect(
    ctx: &Context,
    user: UserId,
    id: ModalId,
    timeout: Duration,
) -> Option<Arc<ModalSubmitInteraction>> {
    let custom_id = id.to_string();
    CollectModalInteraction::new(&ctx.shard)
        .author_id(user.0)
        .filter(move |i| i.data.custom_id == custom_id)
        .timeout(timeout)
        .await
}

/// Forms whose collector gave up waiting, so a late submission can be told apart
/// from one a collector is about to pick up.
///
/// Only the most recent forms are remembered.
#[derive(Default)]
pub struct ExpiredForms {
    ids: Mutex<VecDeque<InteractionId>>,
}

impl ExpiredForms {
    pub async fn mark(&self, id: ModalId) {
        let mut ids = self.ids.lock().await;
        if ids.len() == REMEMBERED_EXPIRED_FORMS {
            ids.pop_front();
        }
        ids.push_back(id.interaction_id);
    }

    /// Returns whether `id` had expired, forgetting it.
    pub async fn take(&self, id: ModalId) -> bool {
        let mut ids = self.ids.lock().await;
        match ids.iter().position(|&i| i == id.interaction_id) {
            Some(pos) => {
                ids.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Reads the form fields out of a submission's components.
pub fn raw_params(rows: &[ActionRow]) -> RawParams {
    fields_to_params(rows.iter().flat_map(|row| &row.components).filter_map(
        |component| match component {
            ActionRowComponent::InputText(input) => {
                Some((input.custom_id.as_str(), input.value.as_str()))
            }
            _ => None,
        },
    ))
}

fn fields_to_params<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> RawParams {
    let mut params = RawParams::default();
    for (id, value) in fields {
        let slot = match id {
            PROMPT_INPUT => &mut params.prompt,
            NEGATIVE_PROMPT_INPUT => &mut params.negative_prompt,
            CFG_SCALE_INPUT => &mut params.cfg_scale,
            SAMPLER_INPUT => &mut params.sampler,
            STEPS_INPUT => &mut params.steps,
            _ => continue,
        };
        *slot = value.to_owned();
    }
    params
}
