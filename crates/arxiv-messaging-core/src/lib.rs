pub mod error;
pub mod event;
pub mod id;
pub mod subscription;
pub mod time;

pub use error::{CoreError, Result};
pub use event::{Event, EventType};
pub use id::correlation_id;
pub use subscription::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, Subscription,
};
pub use time::{
    Clock, SystemClock, format_date, format_full, format_hour_minute, now_utc, parse_timestamp,
};
