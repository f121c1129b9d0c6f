use crate::contact::{has_identifying_field, normalize_header, RawRecord};
use crate::{ParseError, ParseResult};
use memchr::memchr2_iter;
use tracing::{debug, warn};

/// Split one line on commas, honoring `"` quoting. `""` inside a quoted
/// section is a literal quote. A quote still open at end of line is an error.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let bytes = line.as_bytes();
    let mut fields = Vec::new();
    let mut current: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut in_quotes = false;
    let mut cursor = 0usize;
    let mut skip_next_quote = false;

    for pos in memchr2_iter(b',', b'"', bytes) {
        current.extend_from_slice(&bytes[cursor..pos]);
        cursor = pos + 1;
        match bytes[pos] {
            b'"' if skip_next_quote => skip_next_quote = false,
            b'"' if in_quotes && bytes.get(pos + 1) == Some(&b'"') => {
                current.push(b'"');
                skip_next_quote = true;
            }
            b'"' => in_quotes = !in_quotes,
            _ if in_quotes => current.push(b','),
            _ => fields.push(finish(&mut current)?),
        }
    }
    current.extend_from_slice(&bytes[cursor..]);
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(finish(&mut current)?);
    Ok(fields)
}

fn finish(buf: &mut Vec<u8>) -> Result<String, String> {
    let field = String::from_utf8(std::mem::take(buf)).map_err(|e| e.to_string())?;
    Ok(field.trim().to_string())
}

/// Last-resort line-oriented parser. The first line is the header; every
/// other non-blank line is tokenized on its own, so a broken line only
/// costs that line.
pub fn parse_manual(raw: &str) -> ParseResult<Vec<RawRecord>> {
    let lines: Vec<&str> = raw
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.len() < 2 {
        return Err(ParseError::TooFewLines(lines.len()));
    }

    let headers: Vec<String> = tokenize(lines[0])
        .map_err(|reason| ParseError::Malformed { line: 1, reason })?
        .iter()
        .map(|h| normalize_header(h))
        .collect();

    let mut records = Vec::with_capacity(lines.len() - 1);
    for (idx, line) in lines.iter().enumerate().skip(1) {
        let values = match tokenize(line) {
            Ok(v) => v,
            Err(reason) => {
                warn!(line = idx + 1, %reason, "skipping unparseable line");
                continue;
            }
        };
        let record = RawRecord::from_row(&headers, &values);
        if has_identifying_field(&record) {
            records.push(record);
        } else {
            debug!(line = idx + 1, "dropping line without identifying fields");
        }
    }
    Ok(records)
}
