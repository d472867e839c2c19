pub mod audio;
pub mod health;
