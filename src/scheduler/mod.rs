//! Reconciliation scheduler: periodic local-winner and global-round sweeps

pub mod guard;
pub mod reconciler;

pub use guard::{SingleFlight, SingleFlightPermit};
pub use reconciler::{
    ReconciliationScheduler, SweepIntervals, SweepOutcome, GLOBAL_SWEEP, LOCAL_SWEEP,
};
