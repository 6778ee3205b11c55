pub mod checkpoint;
pub mod clients;
pub mod configuration;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod ingress;
pub mod poller;
pub mod process_after;
pub mod queue;
pub mod sink;
pub mod startup;
pub mod telemetry;
pub mod webhooks;
pub mod worker;
