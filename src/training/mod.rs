//! GRPO-style training data extraction and advertisement (§4.4, §6).

pub mod advantage;
pub mod store;

pub use advantage::{TrainingGroup, WeightedOutputData, extract_training_groups};
pub use store::AdvertisementStore;
