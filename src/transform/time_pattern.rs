//! Date/time patterns in the `yyyy-MM-dd HH:mm:ss` style.
//!
//! Job configurations describe timestamps with the pattern letters familiar
//! from most date libraries. A pattern is compiled once into a list of
//! [`chrono`] format items and then used to parse every record.
//!
//! Supported letters: `y`/`u` (year), `M` (month, `MMM` short name, `MMMM`
//! long name), `d` (day), `D` (day of year), `H`, `h`, `a`, `m`, `s`, `S`
//! (3, 6 or 9 digit fraction), `E` (weekday name) and the offset letters `X`,
//! `x` and `Z`. Text in single quotes is literal and `''` is a quote.
//!
//! A pattern without a year parses into the current year. A pattern without an
//! offset is read as UTC.

use crate::error::{IngestError, Result};
use chrono::format::{self, Fixed, Item, Numeric, Pad, Parsed, StrftimeItems};
use chrono::{DateTime, Datelike, Utc};

/// A compiled date/time pattern.
#[derive(Debug, Clone)]
pub struct TimePattern {
    pattern: String,
    items: Vec<Item<'static>>,
    has_year: bool,
    has_offset: bool,
}

impl TimePattern {
    /// Compile `pattern`.
    ///
    /// The pattern is proven usable by formatting the epoch with it and parsing
    /// the result back; patterns that cannot identify an instant (no day, no
    /// hour, ...) are rejected here rather than on every record.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for unsupported letters, unterminated
    /// quotes and patterns that cannot yield a timestamp.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut items = Vec::new();
        let mut has_year = false;
        let mut has_offset = false;

        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                let (literal, next) = quoted_literal(&chars, i, pattern)?;
                if !literal.is_empty() {
                    items.push(Item::OwnedLiteral(literal.into_boxed_str()));
                }
                i = next;
                continue;
            }
            if !c.is_ascii_alphabetic() {
                let start = i;
                while i < chars.len() && !chars[i].is_ascii_alphabetic() && chars[i] != '\'' {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.chars().all(char::is_whitespace) {
                    items.push(Item::OwnedSpace(text.into_boxed_str()));
                } else {
                    items.push(Item::OwnedLiteral(text.into_boxed_str()));
                }
                continue;
            }

            let mut count = 1;
            while i + count < chars.len() && chars[i + count] == c {
                count += 1;
            }
            i += count;

            match c {
                'y' | 'u' => {
                    has_year = true;
                    items.push(if count == 2 {
                        Item::Numeric(Numeric::YearMod100, Pad::Zero)
                    } else {
                        Item::Numeric(Numeric::Year, Pad::Zero)
                    });
                }
                'M' => items.push(match count {
                    1 => Item::Numeric(Numeric::Month, Pad::None),
                    2 => Item::Numeric(Numeric::Month, Pad::Zero),
                    3 => Item::Fixed(Fixed::ShortMonthName),
                    _ => Item::Fixed(Fixed::LongMonthName),
                }),
                'd' => items.push(Item::Numeric(Numeric::Day, pad(count))),
                'D' => items.push(Item::Numeric(Numeric::Ordinal, pad(count))),
                'H' => items.push(Item::Numeric(Numeric::Hour, pad(count))),
                'h' => items.push(Item::Numeric(Numeric::Hour12, pad(count))),
                'a' => items.push(Item::Fixed(Fixed::UpperAmPm)),
                'm' => items.push(Item::Numeric(Numeric::Minute, pad(count))),
                's' => items.push(Item::Numeric(Numeric::Second, pad(count))),
                'S' => items.push(fraction(count).ok_or_else(|| {
                    IngestError::config(format!(
                        "fraction of second must have 3, 6 or 9 digits in pattern '{pattern}'"
                    ))
                })?),
                'E' => items.push(if count >= 4 {
                    Item::Fixed(Fixed::LongWeekdayName)
                } else {
                    Item::Fixed(Fixed::ShortWeekdayName)
                }),
                'X' => {
                    has_offset = true;
                    items.push(if count >= 3 {
                        Item::Fixed(Fixed::TimezoneOffsetColonZ)
                    } else {
                        Item::Fixed(Fixed::TimezoneOffsetZ)
                    });
                }
                'x' => {
                    has_offset = true;
                    items.push(if count >= 3 {
                        Item::Fixed(Fixed::TimezoneOffsetColon)
                    } else {
                        Item::Fixed(Fixed::TimezoneOffset)
                    });
                }
                'Z' => {
                    has_offset = true;
                    items.push(if count >= 5 {
                        Item::Fixed(Fixed::TimezoneOffsetColonZ)
                    } else {
                        Item::Fixed(Fixed::TimezoneOffset)
                    });
                }
                other => {
                    return Err(IngestError::config(format!(
                        "unsupported letter '{other}' in date pattern '{pattern}'"
                    )));
                }
            }
        }

        let compiled = Self {
            pattern: pattern.to_string(),
            items,
            has_year,
            has_offset,
        };
        compiled.verify()?;
        Ok(compiled)
    }

    /// The pattern text as configured.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parse `value` into epoch milliseconds, or `None` if it does not match.
    #[must_use]
    pub fn parse_epoch_ms(&self, value: &str) -> Option<i64> {
        let mut parsed = Parsed::new();
        format::parse(&mut parsed, value, self.items.iter()).ok()?;
        self.resolve(&mut parsed)
    }

    fn resolve(&self, parsed: &mut Parsed) -> Option<i64> {
        if !self.has_year {
            parsed.set_year(i64::from(Utc::now().year())).ok()?;
        }
        if self.has_offset {
            parsed.to_datetime().ok().map(|dt| dt.timestamp_millis())
        } else {
            parsed
                .to_naive_datetime_with_offset(0)
                .ok()
                .map(|ndt| ndt.and_utc().timestamp_millis())
        }
    }

    fn verify(&self) -> Result<()> {
        let formatted = DateTime::<Utc>::UNIX_EPOCH
            .format_with_items(self.items.iter())
            .to_string();
        match self.parse_epoch_ms(&formatted) {
            Some(_) => Ok(()),
            None => Err(IngestError::config(format!(
                "Timestamp cannot be derived from pattern: {}",
                self.pattern
            ))),
        }
    }
}

fn pad(count: usize) -> Pad {
    if count >= 2 { Pad::Zero } else { Pad::None }
}

fn fraction(digits: usize) -> Option<Item<'static>> {
    let spec = match digits {
        3 => "%3f",
        6 => "%6f",
        9 => "%9f",
        _ => return None,
    };
    StrftimeItems::new(spec).next()
}

/// Read a quoted literal starting at `chars[start] == '\''`.
/// Returns the literal text and the index after the closing quote.
fn quoted_literal(chars: &[char], start: usize, pattern: &str) -> Result<(String, usize)> {
    if chars.get(start + 1) == Some(&'\'') {
        return Ok(("'".to_string(), start + 2));
    }
    let mut literal = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                literal.push('\'');
                i += 2;
                continue;
            }
            return Ok((literal, i + 1));
        }
        literal.push(chars[i]);
        i += 1;
    }
    Err(IngestError::config(format!(
        "unterminated quote in date pattern '{pattern}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_pattern_with_millis() {
        let p = TimePattern::compile("yyyy-MM-dd HH:mm:ss.SSSXXX").unwrap();
        assert_eq!(p.parse_epoch_ms("2014-01-01 13:42:56.500Z"), Some(1_388_583_776_500));
        assert_eq!(
            p.parse_epoch_ms("2014-01-01 14:42:56.500+01:00"),
            Some(1_388_583_776_500)
        );
    }

    #[test]
    fn test_pattern_without_offset_is_utc() {
        let p = TimePattern::compile("yyyy-MM-dd'T'HH:mm:ss").unwrap();
        assert_eq!(p.parse_epoch_ms("1970-01-01T00:00:10"), Some(10_000));
    }

    #[test]
    fn test_named_month_and_weekday() {
        let p = TimePattern::compile("EEE, d MMM yyyy HH:mm:ss Z").unwrap();
        assert_eq!(p.parse_epoch_ms("Thu, 1 Jan 1970 00:01:00 +0000"), Some(60_000));
    }

    #[test]
    fn test_mismatch_returns_none() {
        let p = TimePattern::compile("yyyy-MM-dd HH:mm").unwrap();
        assert_eq!(p.parse_epoch_ms("not a date"), None);
        assert_eq!(p.parse_epoch_ms("2014-01-01"), None);
    }

    #[test]
    fn test_pattern_without_time_is_rejected() {
        let err = TimePattern::compile("yyyy-MM-dd").unwrap_err();
        assert!(err.to_string().contains("Timestamp cannot be derived from pattern"));
    }

    #[test]
    fn test_unsupported_letter_is_rejected() {
        assert!(TimePattern::compile("yyyy-MM-dd HH:mm zzz").is_err());
        assert!(TimePattern::compile("HH:mm:ss.SS").is_err());
        assert!(TimePattern::compile("'unterminated").is_err());
    }
}
