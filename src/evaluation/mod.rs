pub mod dataset;
pub mod labels;
pub mod resolver;
pub mod scorer;

pub use dataset::ReferenceDataset;
pub use scorer::evaluate;
