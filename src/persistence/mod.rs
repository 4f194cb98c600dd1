//! On-disk layout for a Wesley working directory and the plan/explain
//! artifact writers that live alongside checkpoints and logs (spec §6).

pub mod layout;

pub use layout::{LayoutError, WesleyHome};
