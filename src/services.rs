pub mod backfill_planner;
pub mod import_service;
pub mod observation_writer;
pub mod orchestrator;
pub mod station_reconciler;

pub use backfill_planner::{BackfillPlanner, PlannedWindow};
pub use import_service::{ImportError, ImportService, TargetOutcome, TargetReport};
pub use observation_writer::{ObservationWriter, WriteOutcome};
pub use orchestrator::{
    BatchOrchestrator, DryRunEstimate, RunError, RunOptions, RunStatistics, StationSelector,
    TargetFailure, WindowSpec,
};
pub use station_reconciler::{
    CatalogSyncReport, ReconcileOutcome, StationChange, StationReconciler,
};
