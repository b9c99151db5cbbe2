//! Per-run context handed to every strategy attempt

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, MigrationEvent};
use crate::settings::MigrationSettings;

/// Event sink, cancellation signal and settings for one run
#[derive(Clone)]
pub struct RunContext {
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    settings: MigrationSettings,
}

impl RunContext {
    /// Context with default settings and a fresh cancellation token
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            cancel: CancellationToken::new(),
            settings: MigrationSettings::default(),
        }
    }

    /// Use the caller's cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use custom settings
    pub fn with_settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The event sink
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Shorthand for `sink().emit(event)`
    pub fn emit(&self, event: MigrationEvent) {
        self.sink.emit(event);
    }

    /// The cancellation signal
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Strategy settings
    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }
}
