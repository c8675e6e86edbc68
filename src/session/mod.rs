pub mod answers;
pub mod controller;
pub mod integrity;
pub mod replay;
pub mod scoring;
pub mod timer;
