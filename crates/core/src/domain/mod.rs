pub mod agent;
pub mod approval;
pub mod benchmark;
pub mod conversation;
pub mod money;
pub mod offer;
