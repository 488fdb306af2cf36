//! Terminal front end for the tic-tac-toe client core.

pub mod commands;
pub mod platform;
pub mod render;
