pub mod hst;
pub mod identity;
pub mod persist;
