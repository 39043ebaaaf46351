use crate::widget::VoiceWidget;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The widget instance controlled through the API
    pub widget: Arc<VoiceWidget>,
}

impl AppState {
    pub fn new(widget: VoiceWidget) -> Self {
        Self {
            widget: Arc::new(widget),
        }
    }
}
