pub mod colors;
pub mod error;
pub mod extent;
pub mod geojson;
pub mod layer;
pub mod normalize;
pub mod projection;

pub use colors::Rgba;
pub use error::DecodeError;
pub use extent::Extent;
pub use geojson::*;
pub use layer::*;
pub use normalize::{normalize_geojson, pagination_next};
