// src/touch/mod.rs
//
// Resistive touchscreen support: four-point calibration and input smoothing.

pub mod calibration;
pub mod filter;

pub use calibration::{
    calibrate, load, load_or_default, CalibrationPoints, CalibrationSource, Coefficients, LoadedCalibration,
    Point, ScreenGeometry, TouchCalibration, DEFAULT_CALIBRATION_FILE,
};
pub use filter::{TouchFilter, TouchState};
