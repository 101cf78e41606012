//! Scalar type aliases, mirroring the original firmware's `mainboard-def.h`
//! typedefs (`ticks_t`, `millivolt_t`, ...) but using fixed-point integers
//! where the canlib wire encoding is itself integral.

/// A monotonic tick count, one per `conf::TICK_RESOLUTION_MS`.
pub type Ticks = u32;

/// Cell/pack voltage in millivolts.
pub type Millivolts = i32;

/// Pack current in milliamps.
pub type Milliamps = i32;

/// Cell/sensor temperature in whole degrees Celsius.
pub type Celsius = i16;

/// PWM frequency reading from the IMD decoder, in Hz.
pub type Hertz = u32;
