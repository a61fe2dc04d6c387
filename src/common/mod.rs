pub mod hash_id;
pub mod response;
pub mod upload;
