use std::cell::RefCell;
use std::time::{Duration, SystemTime};

use bytes::BytesMut;

// "Sun, 06 Nov 1994 08:49:37 GMT".len()
pub(crate) const DATE_VALUE_LENGTH: usize = 29;

/// Appends the current RFC-1123 date to `dst`.
///
/// Rendering the date is surprisingly hot under load; the formatted value
/// is cached per thread and refreshed at most once a second.
pub(crate) fn extend(dst: &mut BytesMut) {
    CACHED.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.check();
        dst.extend_from_slice(cache.buffer());
    })
}

struct CachedDate {
    bytes: [u8; DATE_VALUE_LENGTH],
    next_update: SystemTime,
}

thread_local!(static CACHED: RefCell<CachedDate> = RefCell::new(CachedDate::new()));

impl CachedDate {
    fn new() -> CachedDate {
        let mut cache = CachedDate {
            bytes: [0; DATE_VALUE_LENGTH],
            next_update: SystemTime::UNIX_EPOCH,
        };
        cache.update(SystemTime::now());
        cache
    }

    fn buffer(&self) -> &[u8] {
        &self.bytes[..]
    }

    fn check(&mut self) {
        let now = SystemTime::now();
        if now > self.next_update {
            self.update(now);
        }
    }

    fn update(&mut self, now: SystemTime) {
        let rendered = httpdate::fmt_http_date(now);
        debug_assert_eq!(DATE_VALUE_LENGTH, rendered.len());
        self.bytes.copy_from_slice(rendered.as_bytes());
        self.next_update = now + Duration::from_secs(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_len() {
        assert_eq!(DATE_VALUE_LENGTH, "Sun, 06 Nov 1994 08:49:37 GMT".len());
    }

    #[test]
    fn test_date_shape() {
        let mut buf = BytesMut::new();
        extend(&mut buf);
        assert_eq!(DATE_VALUE_LENGTH, buf.len());
        assert!(buf.ends_with(b" GMT"));
    }
}
