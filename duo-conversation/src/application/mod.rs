pub mod client;
pub mod composer;
pub mod feed;
pub mod gate;
pub mod recording;
