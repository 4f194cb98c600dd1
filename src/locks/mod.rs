//! Lock-level classification: PostgreSQL's lock taxonomy and the classifier
//! that maps operations onto it.

pub mod classifier;
pub mod level;

pub use classifier::LockClassifier;
pub use level::{BlockingPotential, LockLevel};
