//! MQTT access to the Wirepas gateway API

mod connector;
pub mod topics;

pub use connector::{mqtt_options, MqttObserver};
pub use topics::{subscriptions, Topic, Topics};
