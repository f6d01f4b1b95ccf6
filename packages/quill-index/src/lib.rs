pub mod point;
pub mod qdrant;

mod error;

pub use error::Error;
pub use point::{IndexHit, IndexPoint, point_uuid};
pub use qdrant::QdrantIndex;

pub type Result<T, E = Error> = std::result::Result<T, E>;
