//! Concrete market data providers.

pub mod polygon;
pub mod synthetic;

pub use polygon::PolygonProvider;
pub use synthetic::SyntheticProvider;
