pub mod constant;
pub mod key_path;
