pub mod bulk;
pub mod composites;
pub mod export;
pub mod handlers;
