pub mod attempts;
pub mod builder;
pub mod core;
