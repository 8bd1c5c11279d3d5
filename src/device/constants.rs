/**
 * How long (milliseconds) a write to the command characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * Settle interval (milliseconds) for continuous controls such as sensitivity sliders.
 */
pub const CONTINUOUS_SETTLE: u64 = 130;

/**
 * Settle interval (milliseconds) for discrete controls: toggles, pickers and stepped sliders.
 */
pub const DISCRETE_SETTLE: u64 = 200;

/**
 * How long (seconds) the UI shows "Calibrating..." after both postures were recorded.
 * Nothing is sent to the device when this elapses.
 */
pub const CALIBRATION_FINISH_DELAY: u64 = 10;

/**
 * Durations (seconds) the posture reminder can be disabled for. The device receives the
 * 1-based index into this list, not the duration itself.
 */
pub const DISABLE_REMINDER_PRESETS: [u64; 9] = [30, 60, 120, 180, 300, 600, 900, 1200, 1800];

pub const TAG_STAND_CALIBRATION: char = 'a';
pub const TAG_SIT_CALIBRATION: char = 'b';
pub const TAG_DISABLE_REMINDER: char = 'c';
pub const TAG_ROUNDED_SHOULDER_DETECTION: char = 'd';
pub const TAG_SPINE_TILT_DETECTION: char = 'e';
pub const TAG_ROUNDED_SHOULDER_SENSITIVITY: char = 'f';
pub const TAG_SPINE_TILT_SENSITIVITY: char = 'g';
pub const TAG_ROUNDED_SHOULDER_VIBRATION: char = 'j';
pub const TAG_SPINE_TILT_VIBRATION: char = 'k';
pub const TAG_TOLERANCE_TIME: char = 'l';

/**
 * Capacity of the request queue in front of the session task.
 */
pub const SESSION_REQUEST_CAPACITY: usize = 64;

/**
 * Capacity of the queue carrying transport events into the session task.
 */
pub const TRANSPORT_EVENT_CAPACITY: usize = 128;

/**
 * Capacity of the queue carrying setting changes into the dispatcher task.
 */
pub const DISPATCHER_CAPACITY: usize = 128;
