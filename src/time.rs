/// Simulated time unit (one tick is one hour).
pub type Tick = u64;

pub const TICKS_PER_DAY: Tick = 24;

/// Convert a duration in days to whole ticks.
///
/// Durations are rounded to the nearest tick and never shorter than one tick,
/// so a scheduled transition always lands strictly in the future.
pub fn days_to_ticks(days: f64) -> Tick {
    hours_to_ticks(days * TICKS_PER_DAY as f64)
}

/// Convert a duration in hours to whole ticks (at least one).
pub fn hours_to_ticks(hours: f64) -> Tick {
    let ticks = hours.round();
    if ticks.is_finite() && ticks >= 1.0 {
        ticks as Tick
    } else if ticks.is_infinite() && ticks > 0.0 {
        Tick::MAX / 2
    } else {
        1
    }
}
