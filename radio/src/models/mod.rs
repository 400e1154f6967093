pub mod favorites;
pub mod station;
