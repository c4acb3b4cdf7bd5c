pub mod local;
pub mod memory;
pub mod object_store;
