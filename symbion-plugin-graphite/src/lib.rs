//! Symbion Plugin Graphite - perfdata de supervision vers Carbon
//!
//! Chaîne de traitement :
//! - broks MQTT → `events`
//! - perfdata → échantillons (`perfdata`)
//! - chemin Graphite depuis les customs AWS (`naming`)
//! - horodatage corrigé de la latence (`timing`)
//! - envoi ligne immédiat ou buffer pickle vidé à chaque tick (`buffer`, `carbon`, `codec`)

pub mod broker;
pub mod buffer;
pub mod carbon;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod mqtt;
pub mod naming;
pub mod perfdata;
pub mod timing;

pub use broker::{CheckOutcome, GraphiteBroker};
pub use config::{load_config, GraphiteConfig};
pub use events::{BrokEvent, PipelineEvent};
