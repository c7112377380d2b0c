pub mod drafts;
pub mod favorites;
pub mod feed;
pub mod publish;
pub mod staging;
