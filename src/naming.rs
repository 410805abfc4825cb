//! Canonical filename derivation
//!
//! Archived attachments are named `MM_LastName_OriginalBaseName.ext`:
//! ASCII-sanitized, last name capped at 20 characters, base name at 50,
//! and the whole name at 100 characters with the extension preserved.

use chrono::{DateTime, Datelike, Months, Utc};

use crate::error::{ArchiveError, Result};

const MAX_LAST_NAME_LEN: usize = 20;
const MAX_BASE_NAME_LEN: usize = 50;
const MAX_FILENAME_LEN: usize = 100;

/// Earliest plausible message year; anything before this is treated as an
/// unparseable date, not merely unusual
const MIN_PLAUSIBLE_YEAR: i32 = 1990;

/// Messages dated further ahead than this are treated as unparseable
const MAX_FUTURE_MONTHS: u32 = 120;

/// Strip characters unsafe for filenames, keeping ASCII alphanumerics,
/// dots, hyphens and underscores
pub fn sanitize(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    cleaned.trim_matches('.').to_string()
}

/// Derive a "last name" token from a From header
///
/// `"Display Name" <addr@domain>` takes the trailing whitespace-separated
/// token of the display name, or the leading token for "Last, First" form.
/// A bare address falls back to the final `.`/`_`/`-` segment of the local
/// part.
pub fn sender_last_name(from_header: &str) -> String {
    let (display, address) = split_from_header(from_header);

    let raw = if let Some(display) = display {
        if let Some((last, _)) = display.split_once(',') {
            last.trim().to_string()
        } else {
            display
                .split_whitespace()
                .next_back()
                .unwrap_or("")
                .to_string()
        }
    } else {
        let local = address.split('@').next().unwrap_or("");
        local
            .split(['.', '_', '-'])
            .filter(|s| !s.is_empty())
            .next_back()
            .unwrap_or("")
            .to_string()
    };

    let sanitized = truncated(&sanitize(&raw), MAX_LAST_NAME_LEN);
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Split a From header into an optional display name and the address
fn split_from_header(header: &str) -> (Option<String>, &str) {
    if let (Some(start), Some(end)) = (header.find('<'), header.rfind('>')) {
        if start < end {
            let name = header[..start].trim().trim_matches('"').trim();
            let address = header[start + 1..end].trim();
            if name.is_empty() {
                return (None, address);
            }
            return (Some(name.to_string()), address);
        }
    }
    (None, header.trim())
}

/// Parse a Date header into `(year, month)`
///
/// Accepts RFC 2822 with an RFC 3339 fallback. Dates before 1990 or more
/// than ten years in the future are rejected as unparseable.
pub fn parse_message_date(date_header: &str) -> Result<(i32, u32)> {
    let parsed = DateTime::parse_from_rfc2822(date_header)
        .or_else(|_| DateTime::parse_from_rfc3339(date_header))
        .map_err(|e| ArchiveError::Validation(format!("Invalid Date header: {}", e)))?
        .with_timezone(&Utc);

    if parsed.year() < MIN_PLAUSIBLE_YEAR {
        return Err(ArchiveError::Validation(format!(
            "Implausible message date {}: before {}",
            parsed.format("%Y-%m-%d"),
            MIN_PLAUSIBLE_YEAR
        )));
    }

    let horizon = Utc::now()
        .checked_add_months(Months::new(MAX_FUTURE_MONTHS))
        .unwrap_or_else(Utc::now);
    if parsed > horizon {
        return Err(ArchiveError::Validation(format!(
            "Implausible message date {}: more than 10 years in the future",
            parsed.format("%Y-%m-%d")
        )));
    }

    Ok((parsed.year(), parsed.month()))
}

/// Compose the canonical archive filename
pub fn canonical_filename(month: u32, last_name: &str, original_filename: &str) -> String {
    let (stem, extension) = split_extension(original_filename);

    let last = {
        let s = truncated(&sanitize(last_name), MAX_LAST_NAME_LEN);
        if s.is_empty() {
            "unknown".to_string()
        } else {
            s
        }
    };

    let base = {
        let s = truncated(&sanitize(stem), MAX_BASE_NAME_LEN);
        if s.is_empty() {
            "attachment".to_string()
        } else {
            s
        }
    };

    let ext = sanitize_extension(extension);

    let mut name = format!("{:02}_{}_{}{}", month, last, base, ext);
    if name.len() > MAX_FILENAME_LEN {
        // Preserve the extension; shorten the stem portion to fit
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.len()).max(1);
        let mut head: String = name[..name.len() - ext.len()].to_string();
        head.truncate(keep);
        name = format!("{}{}", head, ext);
        name.truncate(MAX_FILENAME_LEN);
    }
    name
}

/// Flat dedup key: `<4-digit year>/<canonical filename>`
pub fn ledger_key(year: i32, filename: &str) -> String {
    format!("{:04}/{}", year, filename)
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx < filename.len() - 1 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

fn sanitize_extension(extension: &str) -> String {
    if extension.is_empty() {
        return String::new();
    }
    let cleaned = sanitize(extension.trim_start_matches('.'));
    if cleaned.is_empty() {
        String::new()
    } else {
        format!(".{}", cleaned)
    }
}

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize("invoice (final).pdf"), "invoicefinal.pdf");
        assert_eq!(sanitize("a/b\\c:d*e?f"), "abcdef");
        assert_eq!(sanitize("Ünïcodé"), "ncod");
        assert_eq!(sanitize("..hidden.."), "hidden");
        assert_eq!(sanitize("ok_name-1.2"), "ok_name-1.2");
    }

    #[test]
    fn test_last_name_from_display_name() {
        assert_eq!(sender_last_name("John Smith <john@example.com>"), "Smith");
        assert_eq!(
            sender_last_name("\"Maria de la Cruz\" <m@example.com>"),
            "Cruz"
        );
        assert_eq!(sender_last_name("ACME <billing@acme.com>"), "ACME");
    }

    #[test]
    fn test_last_name_from_comma_form() {
        assert_eq!(sender_last_name("Smith, John <js@example.com>"), "Smith");
        assert_eq!(sender_last_name("\"Doe, Jane\" <jd@example.com>"), "Doe");
    }

    #[test]
    fn test_last_name_from_bare_address() {
        assert_eq!(sender_last_name("john.smith@example.com"), "smith");
        assert_eq!(sender_last_name("billing_team-ops@example.com"), "ops");
        assert_eq!(sender_last_name("<solo@example.com>"), "solo");
    }

    #[test]
    fn test_last_name_never_empty() {
        assert_eq!(sender_last_name("???"), "unknown");
        assert_eq!(sender_last_name(""), "unknown");
    }

    #[test]
    fn test_last_name_truncated_to_twenty() {
        let header = format!("{} <x@example.com>", "A".repeat(40));
        assert_eq!(sender_last_name(&header).len(), 20);
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let (year, month) = parse_message_date("Mon, 04 Mar 2024 10:30:00 +0000").unwrap();
        assert_eq!((year, month), (2024, 3));
    }

    #[test]
    fn test_parse_date_rfc3339_fallback() {
        let (year, month) = parse_message_date("2023-11-07T08:00:00Z").unwrap();
        assert_eq!((year, month), (2023, 11));
    }

    #[test]
    fn test_date_range_boundary() {
        // 1989-12-31 rejected, 1990-01-01 accepted
        assert!(parse_message_date("Sun, 31 Dec 1989 23:59:59 +0000").is_err());
        assert!(parse_message_date("Mon, 01 Jan 1990 00:00:00 +0000").is_ok());
    }

    #[test]
    fn test_date_far_future_rejected() {
        let future = Utc::now() + Duration::days(365 * 11);
        assert!(parse_message_date(&future.to_rfc2822()).is_err());

        let near_future = Utc::now() + Duration::days(30);
        assert!(parse_message_date(&near_future.to_rfc2822()).is_ok());
    }

    #[test]
    fn test_date_garbage_rejected() {
        assert!(parse_message_date("not a date").is_err());
        assert!(parse_message_date("").is_err());
    }

    #[test]
    fn test_canonical_filename_shape() {
        assert_eq!(
            canonical_filename(3, "Smith", "invoice.pdf"),
            "03_Smith_invoice.pdf"
        );
        assert_eq!(
            canonical_filename(12, "O'Brien", "Q4 report (draft).xlsx"),
            "12_OBrien_Q4reportdraft.xlsx"
        );
    }

    #[test]
    fn test_canonical_filename_no_extension() {
        assert_eq!(canonical_filename(1, "Lee", "README"), "01_Lee_README");
    }

    #[test]
    fn test_canonical_filename_empty_parts_fall_back() {
        assert_eq!(
            canonical_filename(5, "???", "???.pdf"),
            "05_unknown_attachment.pdf"
        );
    }

    #[test]
    fn test_canonical_filename_bounds() {
        let name = canonical_filename(10, &"L".repeat(80), &format!("{}.pdf", "b".repeat(200)));
        assert!(name.len() <= 100, "got {} chars", name.len());
        assert!(name.ends_with(".pdf"));
        assert!(name.starts_with("10_"));

        // base capped at 50, last name at 20
        let name = canonical_filename(2, "Short", &format!("{}.txt", "x".repeat(200)));
        assert_eq!(name, format!("02_Short_{}.txt", "x".repeat(50)));
    }

    #[test]
    fn test_canonical_filename_dotfile_keeps_no_extension() {
        // Leading dot is not an extension separator
        let name = canonical_filename(7, "Kim", ".gitignore");
        assert_eq!(name, "07_Kim_gitignore");
    }

    #[test]
    fn test_ledger_key_format() {
        assert_eq!(ledger_key(2024, "03_Smith_invoice.pdf"), "2024/03_Smith_invoice.pdf");
    }
}
