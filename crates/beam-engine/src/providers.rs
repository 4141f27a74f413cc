use std::sync::Arc;

use beam_providers::{ImageGenProvider, TextProvider, VLMProvider, VisionProvider};

/// The four upstream providers an orchestrator run needs. Concrete
/// implementations are supplied by the caller; this crate never
/// constructs one itself.
#[derive(Clone)]
pub struct ProviderSet {
    pub text: Arc<dyn TextProvider>,
    pub image: Arc<dyn ImageGenProvider>,
    pub vision: Arc<dyn VisionProvider>,
    pub vlm: Arc<dyn VLMProvider>,
}
