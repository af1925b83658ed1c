pub mod discover;
pub mod flow;
pub mod providers;
