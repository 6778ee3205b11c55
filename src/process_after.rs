use chrono::DateTime;
use chrono::NaiveDate;
use chrono::TimeZone;
use chrono::Utc;

/// Parses `T_PROCESS_AFTER`/`M_PROCESS_AFTER`, format `DD.MM.YYYY`
/// (`spec.md` §6), into a UTC midnight instant.
pub fn parse_process_after(raw: &str) -> Result<DateTime<Utc>, anyhow::Error> {
    let date = NaiveDate::parse_from_str(raw, "%d.%m.%Y")
        .map_err(|e| anyhow::anyhow!("invalid PROCESS_AFTER {raw:?}: {e}"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

/// `spec.md` §4.6 step 4: entities created before `threshold` are "handled,
/// not stored." Returns `true` when the record should be kept.
pub fn passes_process_after(created_at: Option<DateTime<Utc>>, threshold: Option<DateTime<Utc>>) -> bool {
    match (created_at, threshold) {
        (Some(created), Some(threshold)) => created >= threshold,
        _ => true,
    }
}
