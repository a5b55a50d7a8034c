//! Session-level tests driven through scripted HTTP and consent screens.

mod harness;
mod scenarios;
