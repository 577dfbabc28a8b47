//! Shared helpers for drover integration tests.

#![allow(dead_code)]

pub mod env;
