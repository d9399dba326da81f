pub mod api;
pub mod apex;
pub mod blacklist;
pub mod charge;
pub mod dependency_graph;
pub mod emitter;
pub mod error;
pub mod hypothesis;
pub mod isotopic_model;
pub mod mass_bucket;
pub mod params;
pub mod pattern;
pub mod signal;
pub mod stats;
pub mod trace;

pub use crate::api::{find_features, FeatureFinder, FeatureFinderBuilder, FeatureFinderOutput, PipelineCounts};
pub use crate::emitter::Feature;
pub use crate::error::{FeatureFinderError, InvalidInput};
pub use crate::params::FeatureFinderParams;
pub use crate::signal::{Experiment, Peak, Spectrum};
