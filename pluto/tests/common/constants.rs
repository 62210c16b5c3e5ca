use std::time::Duration;

pub static SMALL_DELAY: Duration = Duration::from_millis(200);

pub static EMAIL: &[u8] = b"Hello world!";
