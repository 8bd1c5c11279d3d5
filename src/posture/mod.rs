pub mod calibration;
pub mod reminder;
pub mod settings;
