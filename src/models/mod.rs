pub mod candidate;
pub mod presence;
pub mod quote;
pub mod ride;
