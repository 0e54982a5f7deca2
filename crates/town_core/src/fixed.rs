//! Fixed game constants and the clamp helpers that keep character meters in range.

/// Wall-clock length of one tick in milliseconds.
pub const TICK_DURATION_MS: u64 = 5_000;

/// Ticks per in-game hour (one tick is five game minutes).
pub const TICKS_PER_HOUR: u64 = 12;

/// In-game hour at tick zero.
pub const CALENDAR_START_HOUR: u64 = 6;

pub const STAT_MIN: u8 = 1;
pub const STAT_MAX: u8 = 10;

pub const MAX_HEALTH: u8 = 100;
pub const MAX_REPUTATION: u8 = 100;
pub const STARTING_REPUTATION: u8 = 50;
pub const MAX_WANTED_LEVEL: u8 = 5;
pub const MAX_INTOXICATION: u8 = 10;

/// Intoxication drops by one on every tick divisible by this.
pub const INTOXICATION_DECAY_TICKS: u64 = 12;
pub const SLEEP_HP_REGEN_PER_TICK: u8 = 5;
/// Ticks a `dying` character can wait for a doctor.
pub const DYING_SAVE_WINDOW_TICKS: u64 = 3;

/// A pending challenge older than this many ticks expires.
pub const DUEL_ACCEPT_TIMEOUT_TICKS: u64 = 2;
/// Ticks between acceptance and the exchange of shots.
pub const DUEL_PREP_TICKS: u64 = 2;

pub const DECLINE_DUEL_PENALTY: u8 = 5;
pub const WIN_DUEL_BONUS: u8 = 15;
pub const FATAL_DUEL_BONUS: u8 = 25;
pub const HEAL_AMOUNT: u8 = 30;
pub const HEAL_REPUTATION_BONUS: u8 = 10;

/// Clamp an integer value to a bounded `u8` range.
pub fn clamp_u8(value: i32, min: u8, max: u8) -> u8 {
    debug_assert!(min <= max);
    value.clamp(i32::from(min), i32::from(max)) as u8
}

/// Clamp a stat roll to `[STAT_MIN, STAT_MAX]`.
pub fn clamp_stat(value: i32) -> u8 {
    clamp_u8(value, STAT_MIN, STAT_MAX)
}

/// Apply a signed delta to a meter, returning the clamped value.
pub fn commit_delta(current: u8, delta: i32, max: u8) -> u8 {
    clamp_u8(i32::from(current) + delta, 0, max)
}
