mod countdown;

pub use countdown::{expected_tick_count, CountdownListener, CountdownTimer};
