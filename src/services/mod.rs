pub mod environment;
pub mod gateway;
