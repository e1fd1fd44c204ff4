pub mod logging;
pub mod transactions;
