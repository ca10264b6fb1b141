pub mod boundary;
pub mod label;
pub mod lookup;
pub mod overlay;
pub mod probe;
pub mod resolver;
pub mod votes;

pub use crate::domain::model::{GeoPoint, LegislatorRecord, Resolution, ResolutionResult};
pub use crate::utils::error::Result;
pub use label::{County, DistrictLabel};
pub use lookup::LookupService;
pub use overlay::{OverlayCache, OverlayIndex};
pub use resolver::DistrictResolver;
pub use votes::{VoteCache, VoteProvider, VoteTable, VoteValue};
