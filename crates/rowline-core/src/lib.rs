//! Core types and traits for the Rowline adapter.
//!
//! `rowline-core` is the **foundation layer**: dynamic values, raw rows,
//! normalized records, collection schemas, the driver abstraction, and the
//! shared error taxonomy.
//!
//! # Role In The Architecture
//!
//! - **Values and rows**: dynamic SQL data as it crosses the driver boundary.
//! - **Records**: attribute-keyed results, including populated associations.
//! - **Schema**: collection/attribute definitions registered by the host ORM.
//! - **Driver trait**: the seam to the engine, `Cx` + `Outcome` throughout.
//!
//! Everything async in this workspace flows through asupersync's structured
//! concurrency: operations take `&Cx` and return `Outcome<T, Error>`.

pub use asupersync::{Cx, Outcome};

pub mod config;
pub mod driver;
pub mod error;
pub mod record;
pub mod row;
pub mod schema;
pub mod value;

pub use config::ConnectConfig;
pub use driver::{Driver, ExecResult, SESSION_BOOTSTRAP};
pub use error::{
    CompileError, ConfigError, ConfigErrorKind, ConstraintViolation, Error, ExecutionError,
    PoolError, PoolErrorKind, Result, remap_constraint_violation,
};
pub use record::Record;
pub use row::{ColumnInfo, Row};
pub use schema::{AttrDef, AttrType, CollectionDef, DEFAULT_PRIMARY_KEY};
pub use value::Value;

/// Format a timestamp (microseconds since the Unix epoch, UTC) in the
/// session wire format `yyyy-mm-dd hh24:mi:ss`.
///
/// The session bootstrap pins NLS_TIMESTAMP_FORMAT/NLS_DATE_FORMAT to this
/// exact shape, so literals produced here parse on any bootstrapped session.
pub fn format_datetime(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);

    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3_600;
    let minute = (secs_of_day % 3_600) / 60;
    let second = secs_of_day % 60;

    format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
}

/// Convert days since 1970-01-01 to a (year, month, day) civil date.
/// Standard era-based algorithm over 400-year cycles.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year, m as u32, d as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_as_midnight() {
        assert_eq!(format_datetime(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn known_instants() {
        // 2001-09-09 01:46:40 UTC
        assert_eq!(
            format_datetime(1_000_000_000 * 1_000_000),
            "2001-09-09 01:46:40"
        );
        // 2020-02-29 (leap day) 12:00:00 UTC
        assert_eq!(
            format_datetime(1_582_977_600 * 1_000_000),
            "2020-02-29 12:00:00"
        );
    }

    #[test]
    fn pre_epoch_instants() {
        // 1969-12-31 23:59:59 UTC
        assert_eq!(format_datetime(-1_000_000), "1969-12-31 23:59:59");
    }

    #[test]
    fn sub_second_precision_is_truncated() {
        assert_eq!(format_datetime(1_500_000), "1970-01-01 00:00:01");
    }
}
