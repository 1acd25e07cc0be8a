// Library for tests to access modules

pub mod collector;
pub mod config;
pub mod delta;
pub mod inventory;
pub mod legacy;
pub mod models;
pub mod poller;
pub mod store;
pub mod writer;
