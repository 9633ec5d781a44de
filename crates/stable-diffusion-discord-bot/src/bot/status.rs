use std::sync::Arc;

use tokio::sync::watch;

use super::model::Model;

/// Which model the diffusion backend most likely has loaded.
///
/// Updates go through a single `watch` sender; readers only use the value as a
/// hint for the "switching models" notice, never for correctness.
#[derive(Clone, Debug)]
pub struct ModelStatus {
    sender: Arc<watch::Sender<Option<Model>>>,
}

impl Default for ModelStatus {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl ModelStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The model loaded by the last request, if any.
    pub fn loaded(&self) -> Option<Model> {
        *self.sender.borrow()
    }

    /// Records `model` as loaded and returns the previous value.
    pub fn mark_loaded(&self, model: Model) -> Option<Model> {
        self.sender.send_replace(Some(model))
    }

    /// A receiver notified whenever the loaded model changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Model>> {
        self.sender.subscribe()
    }
}

/// Presence text advertising the loaded model.
pub fn presence_text(model: Model) -> String {
    format!("Model currently loaded: {model}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_returns_previous() {
        let status = ModelStatus::new();
        assert_eq!(status.loaded(), None);
        assert_eq!(status.mark_loaded(Model::DreamShaper), None);
        assert_eq!(status.mark_loaded(Model::Realism), Some(Model::DreamShaper));
        assert_eq!(status.loaded(), Some(Model::Realism));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let status = ModelStatus::new();
        let mut rx = status.subscribe();

        status.clone().mark_loaded(Model::StableDiffusion21);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(Model::StableDiffusion21));
    }

    #[test]
    fn presence() {
        assert_eq!(
            presence_text(Model::StableDiffusion21),
            "Model currently loaded: Stable Diffusion 2.1"
        );
    }
}
