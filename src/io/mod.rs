// src/io/mod.rs
//
// Device I/O. Serial is the only transport the HMI talks over.

pub mod serial;
