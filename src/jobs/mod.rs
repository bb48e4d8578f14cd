pub mod rewards_collection;
pub mod shutdown;
