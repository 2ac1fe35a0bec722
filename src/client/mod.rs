pub mod subscription;

pub use subscription::{
    backoff_delay, Subscription, SubscriptionConfig, INITIAL_BACKOFF, MAX_BACKOFF,
};
