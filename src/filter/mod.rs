//! Message classification: header resolution, criteria evaluation, and
//! sort-key generation.

pub mod criteria;
pub mod keys;
pub mod resolver;
