//! Lookup-table construction and access
//!
//! The producer scans the alignment source, the batch merger sorts in
//! memory and spills runs, the run merger folds the runs into the single
//! final lookup file with its sparse index, and the reader serves the join
//! phase from the finished file.

pub mod batch;
pub mod entry;
pub mod index;
pub mod merge;
pub mod producer;
pub mod reader;
