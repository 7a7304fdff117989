//! Partition repository.
//!
//! One partition per calendar month, stored as a single remote document.
//! Every mutation is a read-modify-write of the whole document.

mod repository;

pub use repository::PartitionRepository;
