pub mod null_model;
pub mod serialization;

pub use null_model::NullModel;
