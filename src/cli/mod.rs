pub mod expenses;
pub mod reports;
pub mod setup;
pub mod ui;
pub mod users;
