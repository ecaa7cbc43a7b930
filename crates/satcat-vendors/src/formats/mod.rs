pub mod airbus;
pub mod blacksky;
pub mod capella;
pub mod common;
pub mod maxar;
pub mod planet;
pub mod skyfi;
