//! Prometheus metrics for the broadcast channel

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    /// Total messages published
    pub static ref MESSAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "coins_messaging_publish_total",
        "Total messages published",
        &["message_type", "status"]
    )
    .unwrap();

    /// Total messages received
    pub static ref MESSAGE_RECEIVE_TOTAL: CounterVec = register_counter_vec!(
        "coins_messaging_receive_total",
        "Total messages received",
        &["message_type", "status"]
    )
    .unwrap();

    /// NATS connection status
    pub static ref NATS_CONNECTION_STATUS: CounterVec = register_counter_vec!(
        "coins_messaging_nats_connection_status",
        "NATS connection status (connected/disconnected)",
        &["status"]
    )
    .unwrap();
}
