pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod notifier;
pub mod scanner;

// Re-export main types
pub use config::{ConfigError, ProcessorConfig};
pub use delivery::{DeliveryConfig, DeliveryEngine, DeliveryError, DeliveryOutcome};
pub use dispatch::{
    DispatchError, DispatcherConfig, DispatcherStatus, NotificationDispatcher, NotificationJob,
    NotificationSink,
};
pub use notifier::{NotifyError, NotifyReport, WebhookNotifier};
pub use scanner::{CommitMode, EventScanner, ScanError, ScanReport, ScanWindow, ScannerConfig};
