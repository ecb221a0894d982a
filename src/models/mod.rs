pub mod line;
pub mod status;
pub mod variance;
