pub mod existence;
pub mod staging;
