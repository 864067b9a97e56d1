//! Route handlers

pub mod audit;
pub mod ingest;
pub mod operator;
pub mod subjects;
