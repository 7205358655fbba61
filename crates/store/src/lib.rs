pub mod database;
pub mod instrument;
pub mod price;
