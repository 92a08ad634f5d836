//! Test support, available with the `helpers` feature.
//!
//! [Emulator] is an in-process stand-in for the storage service that speaks
//! just enough of the JSON and XML APIs to exercise this crate end to end:
//! media uploads, deletes and signed `GET`/`PUT` URLs, whose signatures it
//! verifies.

mod emulator;
pub use emulator::*;
