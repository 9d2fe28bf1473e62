//! Terminal front end for the library commands

pub mod add;
pub mod limit;
pub mod rate;
pub mod report;
pub mod setup;
pub mod sync;
pub mod ui;
