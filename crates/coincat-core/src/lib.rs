// Library root: coin records, valuation engine, collection store, and the
// local/remote persistence collaborators the application is built on.

pub mod collection;
pub mod config;
pub mod db;
pub mod model;
pub mod prices;
pub mod routes;
pub mod sync;
pub mod valuation;
