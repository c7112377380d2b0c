pub mod feed;
pub mod local_image;
pub mod post;
pub mod user;

use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, the unit every stored timestamp uses.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
