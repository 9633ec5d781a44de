use std::{fmt, str::FromStr};

use anyhow::anyhow;

/// A model users can pick from the `/text2img` and `/img2img` commands.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Model {
    StableDiffusion21,
    DreamShaper,
    Realism,
}

/// How a [`Model`] is run on the diffusion backend.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModelProfile {
    /// Checkpoint name pinned through `override_settings`.
    pub checkpoint: &'static str,
    pub width: u32,
    pub height: u32,
}

impl Model {
    /// Every model, in the order they are offered as command choices.
    pub const ALL: [Model; 3] = [Model::StableDiffusion21, Model::DreamShaper, Model::Realism];

    /// The name shown to users and used as the command choice value.
    pub fn display_name(self) -> &'static str {
        match self {
            Model::StableDiffusion21 => "Stable Diffusion 2.1",
            Model::DreamShaper => "DreamShaper",
            Model::Realism => "Realism",
        }
    }

    pub fn profile(self) -> ModelProfile {
        match self {
            // 2.1 was trained at 768.
            Model::StableDiffusion21 => ModelProfile {
                checkpoint: "stable-diffusion-v2-1",
                width: 768,
                height: 768,
            },
            Model::DreamShaper => ModelProfile {
                checkpoint: "dreamshaper",
                width: 512,
                height: 512,
            },
            Model::Realism => ModelProfile {
                checkpoint: "realismEngine",
                width: 512,
                height: 512,
            },
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Model {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|m| m.display_name() == s)
            .ok_or_else(|| anyhow!("Unknown model: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles() {
        assert_eq!(
            Model::StableDiffusion21.profile(),
            ModelProfile {
                checkpoint: "stable-diffusion-v2-1",
                width: 768,
                height: 768
            }
        );
        assert_eq!(
            Model::DreamShaper.profile(),
            ModelProfile {
                checkpoint: "dreamshaper",
                width: 512,
                height: 512
            }
        );
        assert_eq!(
            Model::Realism.profile(),
            ModelProfile {
                checkpoint: "realismEngine",
                width: 512,
                height: 512
            }
        );
    }

    #[test]
    fn parses_display_names() {
        for model in Model::ALL {
            assert_eq!(model.display_name().parse::<Model>().unwrap(), model);
        }
        assert!("dreamshaper".parse::<Model>().is_err());
        assert!("".parse::<Model>().is_err());
    }
}
