pub mod adapters;
pub mod digest;
pub mod error;
pub mod flush;
pub mod scheduler;
pub mod service;

pub use adapters::{ChannelProvider, EmailProvider, SmtpSettings, TlsMode, WebhookProvider};
pub use error::NotificationError;
pub use flush::{FLUSH_SENDER, FlushOrchestrator, FlushReport, FlushRequest};
pub use scheduler::{AGGREGATE_SENDER, Cadence, CadenceOutcome, DigestScheduler};
pub use service::{Deliverer, DeliveryService};
