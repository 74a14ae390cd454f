pub mod bounds;
pub mod constraint;
pub mod dbm;
