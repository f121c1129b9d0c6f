use crate::contact::{has_identifying_field, normalize_header, RawRecord};
use crate::manual::parse_manual;
use crate::{ParseError, ParseResult};
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use memchr::{memchr, memchr_iter};
use tracing::{debug, warn};

/// Error policy applied while reading records with csv-async.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// First malformed record fails the whole pass.
    Strict,
    /// Malformed records are logged and skipped.
    Relaxed,
}

impl Profile {
    fn name(self) -> &'static str {
        match self {
            Profile::Strict => "strict",
            Profile::Relaxed => "relaxed",
        }
    }
}

/// More than one populated column and at least one identifying field.
pub fn is_valid_record(record: &RawRecord) -> bool {
    record.populated() > 1 && has_identifying_field(record)
}

fn unbalanced_quotes(raw: &[u8], start: usize, end: usize) -> bool {
    let start = start.min(raw.len());
    let end = end.clamp(start, raw.len());
    memchr_iter(b'"', &raw[start..end]).count() % 2 == 1
}

fn reader(input: &[u8], has_headers: bool) -> AsyncReader<&[u8]> {
    AsyncReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .delimiter(b',')
        .quote(b'"')
        .create_reader(input)
}

/// Parse with a single csv-async profile, returning only valid records.
///
/// Blank and whitespace-only lines are skipped. A record is malformed when
/// its raw text carries an odd number of quotes, or (strict only) when its
/// width differs from the header's. An opening quote that never closes
/// swallows the rest of the input, so the relaxed profile resumes reading
/// on the line after the record where it started.
pub async fn parse_with_profile(raw: &str, profile: Profile) -> ParseResult<Vec<RawRecord>> {
    let bytes = raw.as_bytes();
    let mut rdr = reader(bytes, true);

    let headers: Vec<String> = rdr
        .headers()
        .await?
        .iter()
        .map(normalize_header)
        .collect();

    // Offsets of the current reader's input within `raw`.
    let mut base = 0usize;
    let mut line_base = 0u64;
    let mut record = StringRecord::new();
    let mut records = Vec::new();
    let mut skipped = 0usize;
    loop {
        let start = rdr.position().byte();
        match rdr.read_record(&mut record).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if profile == Profile::Relaxed => {
                warn!(error = %e, "skipping unreadable record");
                skipped += 1;
                if rdr.position().byte() <= start {
                    break;
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        let end = rdr.position().byte();
        let (record_start, line) = match record.position() {
            Some(p) => (p.byte(), line_base + p.line()),
            None => (start, line_base),
        };

        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let span_start = base + record_start as usize;
        let span_end = base + end as usize;
        if unbalanced_quotes(bytes, span_start, span_end) {
            if profile == Profile::Strict {
                return Err(ParseError::Malformed {
                    line,
                    reason: "unbalanced quotes".to_string(),
                });
            }
            warn!(line, "skipping record with unbalanced quotes");
            skipped += 1;
            match bytes.get(span_start..).and_then(|rest| memchr(b'\n', rest)) {
                Some(nl) => {
                    base = span_start + nl + 1;
                    line_base = line;
                    rdr = reader(&bytes[base..], false);
                    continue;
                }
                None => break,
            }
        }

        if record.len() != headers.len() && profile == Profile::Strict {
            return Err(ParseError::Malformed {
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    record.len()
                ),
            });
        }

        let values: Vec<&str> = record.iter().collect();
        let row = RawRecord::from_row(&headers, &values);
        if is_valid_record(&row) {
            records.push(row);
        }
    }

    if records.is_empty() {
        return Err(ParseError::NoValidRecords(profile.name()));
    }
    debug!(
        profile = profile.name(),
        records = records.len(),
        skipped,
        "csv profile accepted"
    );
    Ok(records)
}

/// Strict profile, then relaxed, then the line-level parser. The first
/// strategy yielding at least one valid record wins.
pub async fn parse(raw: &str) -> ParseResult<Vec<RawRecord>> {
    let mut last = None;
    for profile in [Profile::Strict, Profile::Relaxed] {
        match parse_with_profile(raw, profile).await {
            Ok(records) => return Ok(records),
            Err(e) => {
                debug!(profile = profile.name(), error = %e, "csv profile failed");
                last = Some(e);
            }
        }
    }

    let manual = parse_manual(raw).and_then(|records| {
        let valid: Vec<RawRecord> = records.into_iter().filter(is_valid_record).collect();
        if valid.is_empty() {
            Err(ParseError::NoValidRecords("manual"))
        } else {
            Ok(valid)
        }
    });
    match manual {
        Ok(records) => {
            debug!(records = records.len(), "manual parser accepted");
            Ok(records)
        }
        Err(e) => {
            warn!(error = %e, previous = ?last, "every parse strategy failed");
            Err(ParseError::Exhausted(Box::new(e)))
        }
    }
}
