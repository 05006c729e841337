use crate::service::FanoutService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: FanoutService,
}
