pub mod coordinator;
pub mod enricher;
pub mod fetcher;
pub mod scheduler;
pub mod settings;
pub mod shipper;
pub mod targets;

pub use coordinator::{
    ExportError, ExportPorts, RunCoordinator, RunOptions, RunOutcome, RunReport, StopReason,
};
pub use enricher::Enricher;
pub use fetcher::LogFetcher;
pub use scheduler::Scheduler;
pub use settings::ExportSettings;
pub use shipper::{BatchShipper, HttpShipper, ShipError, ShipReceipt};
pub use targets::AllowedTargetSet;
