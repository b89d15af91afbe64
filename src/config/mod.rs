pub mod run;

pub use run::{BrokerConfig, BrokerKind, RunConfig, SourceKind, SourceSpec};
