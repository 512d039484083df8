pub(crate) mod json;
mod constants;
mod error;

pub use constants::*;
pub use error::*;

/// Attribute values are signed; job numbers and counts saturate at `i64::MAX`.
pub(crate) fn attr_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::attr_int;

    #[test]
    fn attr_int_saturates() {
        assert_eq!(attr_int(42), 42);
        assert_eq!(attr_int(u64::MAX), i64::MAX);
    }
}
