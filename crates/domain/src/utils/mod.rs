//! Pure helper functions

pub mod identity;
