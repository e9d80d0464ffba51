//! Gateway link engine: receive classification, ack emission, reliable send
//! and the outbound drain, plus the counters they maintain.

mod link;
mod stats;

pub use link::{
    DropReason, GatewayLink, Received, JSON_KEY_NODE, MAX_FORWARDED_PAYLOAD, RADIO_BEGIN_RETRY_DELAY,
};
pub use stats::LinkStats;
