//! In-process publish/subscribe for easel.
//!
//! The [`EventBus`] fans typed events out to subscribers by topic. Publishers
//! never block: each subscriber owns a bounded queue and overflow is dropped
//! and counted rather than back-pressured into the publisher.

mod bus;

pub use bus::{Event, EventBus, Subscription, Topic};
