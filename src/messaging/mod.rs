pub mod frames;
pub mod transport;
