//! Umbrella module for the generated CAN message bindings. `pcan.rs` itself
//! is written by `build.rs` from `dbc/pcan.dbc` via `dbc-codegen` and is not
//! checked in.

pub mod pcan;
