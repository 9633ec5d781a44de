use std::{borrow::Cow, collections::HashSet};

use serenity::{builder::CreateEmbed, model::channel::AttachmentType, model::Timestamp};

use super::{backend::GenerationResult, model::Model, params::GenParams};

/// Upper bound (exclusive) for the random part of attachment names.
const FILENAME_SPACE: u64 = 10_000_000_000;

/// A binary attachment with the name its embed refers to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NamedImage {
    pub filename: String,
    pub data: Vec<u8>,
}

impl NamedImage {
    pub fn attachment(&self) -> AttachmentType<'static> {
        AttachmentType::Bytes {
            data: Cow::Owned(self.data.clone()),
            filename: self.filename.clone(),
        }
    }
}

/// One embed of a reply, bound to one attachment.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RenderedEmbed {
    pub title: Option<String>,
    /// Shared by every embed of a message; Discord collates embeds with the
    /// same URL into one gallery.
    pub url: String,
    /// `attachment://<filename>` of the attachment shown by this embed.
    pub image: String,
    pub description: Option<String>,
    pub fields: Vec<(String, String, bool)>,
    pub footer: String,
}

impl RenderedEmbed {
    pub fn to_create_embed(&self) -> CreateEmbed {
        let mut embed = CreateEmbed::default();
        embed.url(&self.url).image(&self.image);
        if let Some(title) = &self.title {
            embed.title(title);
        }
        if let Some(description) = &self.description {
            embed.description(description);
        }
        for (name, value, inline) in &self.fields {
            embed.field(name, value, *inline);
        }
        embed
            .footer(|f| f.text(&self.footer))
            .timestamp(Timestamp::now());
        embed
    }
}

/// A complete reply: embeds and attachments correlated by position and filename.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RenderedMessage {
    pub embeds: Vec<RenderedEmbed>,
    pub attachments: Vec<NamedImage>,
}

impl RenderedMessage {
    pub fn create_embeds(&self) -> Vec<CreateEmbed> {
        self.embeds.iter().map(RenderedEmbed::to_create_embed).collect()
    }

    pub fn files(&self) -> Vec<AttachmentType<'static>> {
        self.attachments.iter().map(NamedImage::attachment).collect()
    }
}

/// Builds a message with one embed per image, each embed produced by `template`.
fn gallery<F>(images: Vec<Vec<u8>>, template: F) -> RenderedMessage
where
    F: Fn() -> RenderedEmbed,
{
    let mut used = HashSet::new();
    let mut message = RenderedMessage::default();

    for data in images {
        let filename = loop {
            let name = format!("{}.png", rand::random::<u64>() % FILENAME_SPACE);
            if used.insert(name.clone()) {
                break name;
            }
        };
        message.embeds.push(RenderedEmbed {
            image: format!("attachment://{filename}"),
            ..template()
        });
        message.attachments.push(NamedImage { filename, data });
    }

    message
}

fn requested_by(user_tag: &str) -> String {
    format!("Requested by {user_tag}")
}

/// Renders images from the hosted API.
pub fn render_hosted(
    images: Vec<Vec<u8>>,
    prompt: &str,
    user_tag: &str,
    group_url: &str,
) -> RenderedMessage {
    gallery(images, || RenderedEmbed {
        url: group_url.to_owned(),
        description: Some(format!("Prompt: {prompt}")),
        footer: requested_by(user_tag),
        ..Default::default()
    })
}

/// Renders a diffusion result. Echoed source images follow the generated ones,
/// and `source_url` (when present) becomes the shared embed URL.
pub fn render_diffusion(
    result: GenerationResult,
    model: Model,
    params: &GenParams,
    user_tag: &str,
    group_url: &str,
    source_url: Option<&str>,
) -> RenderedMessage {
    let negative_prompt = if params.negative_prompt.is_empty() {
        "None".to_owned()
    } else {
        params.negative_prompt.clone()
    };
    let fields = vec![
        ("Prompt:".to_owned(), params.prompt.clone(), false),
        ("Negative Prompt:".to_owned(), negative_prompt, false),
        ("CFG Scale:".to_owned(), params.cfg_scale.to_string(), true),
        ("Sampler:".to_owned(), params.sampler.to_string(), true),
        ("Steps:".to_owned(), params.steps.to_string(), true),
    ];
    let url = source_url.unwrap_or(group_url);

    let images = result
        .images
        .into_iter()
        .chain(result.echoed_sources)
        .collect();

    gallery(images, || RenderedEmbed {
        title: Some(model.to_string()),
        url: url.to_owned(),
        fields: fields.clone(),
        footer: requested_by(user_tag),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::params::Sampler;

    const GROUP: &str = "https://example.com/group.gif";

    fn params(negative_prompt: &str) -> GenParams {
        GenParams {
            prompt: "a lake".to_owned(),
            negative_prompt: negative_prompt.to_owned(),
            cfg_scale: 12,
            sampler: Sampler::Lms,
            steps: 30,
        }
    }

    #[test]
    fn hosted_images_get_one_embed_each() {
        for n in 1..=4u8 {
            let images = (0..n).map(|i| vec![i]).collect();
            let message = render_hosted(images, "a fox", "someone#0001", GROUP);

            assert_eq!(message.embeds.len(), n as usize);
            assert_eq!(message.attachments.len(), n as usize);
            assert!(message.embeds.iter().all(|e| e.url == GROUP));
            for (embed, attachment) in message.embeds.iter().zip(&message.attachments) {
                assert_eq!(embed.image, format!("attachment://{}", attachment.filename));
                assert_eq!(embed.description.as_deref(), Some("Prompt: a fox"));
                assert_eq!(embed.footer, "Requested by someone#0001");
            }
        }
    }

    #[test]
    fn filenames_are_distinct_pngs() {
        let message = render_hosted(vec![vec![]; 4], "x", "u", GROUP);
        let names: HashSet<_> = message.attachments.iter().map(|a| &a.filename).collect();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| n.ends_with(".png")));
    }

    #[test]
    fn diffusion_fields() {
        let result = GenerationResult {
            images: vec![vec![1]],
            echoed_sources: Vec::new(),
        };
        let message = render_diffusion(result, Model::DreamShaper, &params(""), "u", GROUP, None);

        assert_eq!(message.embeds.len(), 1);
        let embed = &message.embeds[0];
        assert_eq!(embed.title.as_deref(), Some("DreamShaper"));
        assert_eq!(embed.url, GROUP);
        assert_eq!(
            embed.fields,
            vec![
                ("Prompt:".to_owned(), "a lake".to_owned(), false),
                ("Negative Prompt:".to_owned(), "None".to_owned(), false),
                ("CFG Scale:".to_owned(), "12".to_owned(), true),
                ("Sampler:".to_owned(), "LMS".to_owned(), true),
                ("Steps:".to_owned(), "30".to_owned(), true),
            ]
        );
    }

    #[test]
    fn img2img_links_source_and_appends_it() {
        let result = GenerationResult {
            images: vec![vec![1]],
            echoed_sources: vec![vec![2]],
        };
        let source = "https://cdn.example/in.png";
        let message = render_diffusion(
            result,
            Model::Realism,
            &params("blur"),
            "u",
            GROUP,
            Some(source),
        );

        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].data, vec![1]);
        assert_eq!(message.attachments[1].data, vec![2]);
        assert!(message.embeds.iter().all(|e| e.url == source));
        assert_eq!(message.embeds[0].fields[1].1, "blur");
    }

    #[test]
    fn create_embed_carries_url_and_image() {
        let message = render_hosted(vec![vec![0]], "p", "u", GROUP);
        let embeds = message.create_embeds();
        let embed = &embeds[0];

        assert_eq!(embed.0.get("url").and_then(|v| v.as_str()), Some(GROUP));
        assert_eq!(
            embed.0.get("image").and_then(|v| v["url"].as_str()),
            Some(message.embeds[0].image.as_str())
        );
        assert_eq!(message.files().len(), 1);
    }
}
