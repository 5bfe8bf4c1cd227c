pub mod events;
pub mod extract;
pub mod history;
pub mod image;
pub mod knowledge;
pub mod markdown;
pub mod report;
