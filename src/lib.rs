pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::Cli;

pub use app::build_service;
pub use config::AppConfig;
pub use core::{DistrictLabel, DistrictResolver, LookupService, OverlayIndex, VoteValue};
pub use domain::model::{GeoPoint, LegislatorRecord, ResolutionResult};
pub use utils::error::{LookupError, Result, Stage, StageError};
