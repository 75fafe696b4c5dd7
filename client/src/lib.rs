#![deny(unused_must_use, deprecated)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Client side of the KeePassC protocol: one-shot server requests and the local agent.

pub mod agent;
pub mod config;
pub mod defaults;
pub mod net;
