//! Setting handlers for different configuration patterns.

pub mod boolean;
pub mod number;
pub mod text;
