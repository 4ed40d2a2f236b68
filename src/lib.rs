//! sceneforged-demux - command-line front end for the sceneforged demultiplexer
//!
//! This library crate exposes the config and report layers for integration testing.

pub mod config;
pub mod report;
