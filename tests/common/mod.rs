//! Shared test helpers. Each test target uses a different subset.
#![allow(dead_code)]
