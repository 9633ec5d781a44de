//! A Discord bot that generates images with a local Stable Diffusion webui
//! and the hosted DALL-E API.
mod bot;
pub use bot::*;
