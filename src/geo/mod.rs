//! Location inference: candidate extraction, geocoding, scene hints, and the
//! resolver that combines them into one best location with a confidence.

pub mod extractor;
pub mod geocoder;
pub mod ratelimit;
pub mod resolver;
pub mod scene;

pub use geocoder::{GeocodeBackend, Geocoder, NominatimBackend};
pub use ratelimit::{FixedDelayLimiter, NoDelayLimiter, RateLimiter};
pub use resolver::{LocationResolver, ResolveInput};
pub use scene::{HeuristicSceneClassifier, SceneClassifier, SceneHint};
