//! Query module for reactivesql
//! Handles descriptor resolution, SQL compilation, concurrent execution
//! and response reshaping.

pub mod compiler;
pub mod descriptor;
pub mod executor;
pub mod response;
