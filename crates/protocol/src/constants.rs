use std::time::Duration;

/// Global error code used when a failure carries no structured device code
/// (transport drop, timeout, or anything that never reached the firmware).
pub const GLOBAL_CODE_UNSET: i32 = -99;

/// Global error code for failures raised by this layer itself rather than by
/// the device.
pub const GLOBAL_CODE_GENERIC: i32 = -1;

/// Width of one subsystem group in the global error-code space.
///
/// Flat (pre-SMPv2) codes occupy `[0, 999]`; group `g` occupies
/// `[(g + 1) * 1000, (g + 2) * 1000)`. Changing this breaks every host
/// binding that decodes the integer space.
pub const GROUP_CODE_STRIDE: i32 = 1000;

/// Smallest MTU a BLE link may negotiate.
pub const MIN_MTU: u16 = 23;

/// Largest MTU a BLE link may negotiate.
pub const MAX_MTU: u16 = 517;

/// Swap times at or below this are almost always a seconds/milliseconds mixup.
pub const SUSPICIOUS_SWAP_TIME: Duration = Duration::from_millis(1000);

/// Pipelining values below this are handed to the engine as "use default".
pub const MIN_EFFECTIVE_WINDOW: u32 = 2;
