pub mod file;
pub mod firebase;
pub mod memory;
