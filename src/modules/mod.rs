pub mod blob;
pub mod clip;
