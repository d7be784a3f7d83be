//! Winner ranking and reward distribution
//!
//! - `ranking`: deterministic ordering and reward tables
//! - `resolver`: global round settlement
//! - `local`: local-winner sweep award

pub mod local;
pub mod ranking;
pub mod resolver;

pub use local::LocalWinnerAward;
pub use ranking::{award, compare_standings, rank, Standing};
pub use resolver::{Settlement, WinnerResolver};
