//! Printf-style serial code templates.
//!
//! A template is compiled once and then rendered against two arguments: the
//! counter value (argument 1) and the generation timestamp (argument 2).
//! Specifiers follow the `%[index$|<][flags][width][.precision]conversion`
//! shape familiar from `printf`:
//!
//! | conversion | argument  | output                                   |
//! |------------|-----------|------------------------------------------|
//! | `d`        | counter   | decimal                                  |
//! | `x` / `X`  | counter   | hexadecimal, lower / upper case          |
//! | `o`        | counter   | octal                                    |
//! | `s` / `S`  | either    | counter as decimal, timestamp as RFC 3339 |
//! | `tY` ...   | timestamp | one date/time field, see [`DateField`]    |
//! | `%%`, `%n` | none      | a literal `%` / newline                  |
//!
//! Date fields are produced with jiff's `strftime`. Timestamps are rendered
//! in the time zone passed to [`SerialCodeTemplate::render`], including `%s`,
//! which prints the RFC 3339 form with that zone's offset.
//!
//! Every specifier is checked against its argument when the template is
//! parsed, so rendering itself cannot fail.
//!
//! ```
//! use jiff::{tz::TimeZone, Timestamp};
//! use tally_generator::format::SerialCodeTemplate;
//!
//! let template = SerialCodeTemplate::parse("ORD%2$tY%<tm%<td-%1$06d").unwrap();
//! let now: Timestamp = "2024-03-09T10:00:00Z".parse().unwrap();
//! let code = template.render(42, now, &TimeZone::UTC);
//! assert_eq!(code.as_str(), "ORD20240309-000042");
//! ```

use crate::error::TemplateError;
use jiff::tz::TimeZone;
use jiff::{Timestamp, Zoned};
use std::fmt::Write;
use tally_core::SerialCode;

/// The two values a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument {
    Counter,
    Timestamp,
}

impl std::fmt::Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter => f.write_str("counter (argument 1)"),
            Self::Timestamp => f.write_str("timestamp (argument 2)"),
        }
    }
}

impl Argument {
    fn from_index(index: usize) -> Option<Self> {
        match index {
            1 => Some(Self::Counter),
            2 => Some(Self::Timestamp),
            _ => None,
        }
    }
}

/// A single date/time field selected by the suffix of a `%t` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    /// `Y`: year, at least four digits.
    Year,
    /// `y`: last two digits of the year.
    YearOfCentury,
    /// `C`: year divided by 100, two digits.
    Century,
    /// `m`: month, `01`-`12`.
    Month,
    /// `d`: day of month, `01`-`31`.
    Day,
    /// `e`: day of month, `1`-`31`.
    DayUnpadded,
    /// `j`: day of year, `001`-`366`.
    DayOfYear,
    /// `H`: hour, `00`-`23`.
    Hour24,
    /// `k`: hour, `0`-`23`.
    Hour24Unpadded,
    /// `I`: hour, `01`-`12`.
    Hour12,
    /// `l`: hour, `1`-`12`.
    Hour12Unpadded,
    /// `M`: minute, `00`-`59`.
    Minute,
    /// `S`: second, `00`-`60`.
    Second,
    /// `L`: millisecond, `000`-`999`.
    Millisecond,
    /// `N`: nanosecond, nine digits.
    Nanosecond,
    /// `p`: `am` / `pm`.
    Meridiem,
    /// `z`: UTC offset as `+HHMM`.
    Offset,
    /// `Z`: time zone abbreviation such as `UTC` or `CET`.
    ZoneAbbrev,
    /// `s`: seconds since the Unix epoch.
    EpochSeconds,
    /// `Q`: milliseconds since the Unix epoch.
    EpochMillis,
    /// `B`: full month name.
    MonthName,
    /// `b` / `h`: abbreviated month name.
    MonthAbbrev,
    /// `A`: full weekday name.
    WeekdayName,
    /// `a`: abbreviated weekday name.
    WeekdayAbbrev,
    /// `F`: `%tY-%tm-%td`.
    IsoDate,
    /// `D`: `%tm/%td/%ty`.
    UsDate,
    /// `T`: `%tH:%tM:%tS`.
    Time24,
    /// `R`: `%tH:%tM`.
    HourMinute,
    /// `r`: `%tI:%tM:%tS %Tp`.
    Time12,
    /// `c`: `%ta %tb %td %tT %tZ %tY`.
    DateTime,
}

impl DateField {
    fn from_suffix(suffix: char) -> Option<Self> {
        let field = match suffix {
            'Y' => Self::Year,
            'y' => Self::YearOfCentury,
            'C' => Self::Century,
            'm' => Self::Month,
            'd' => Self::Day,
            'e' => Self::DayUnpadded,
            'j' => Self::DayOfYear,
            'H' => Self::Hour24,
            'k' => Self::Hour24Unpadded,
            'I' => Self::Hour12,
            'l' => Self::Hour12Unpadded,
            'M' => Self::Minute,
            'S' => Self::Second,
            'L' => Self::Millisecond,
            'N' => Self::Nanosecond,
            'p' => Self::Meridiem,
            'z' => Self::Offset,
            'Z' => Self::ZoneAbbrev,
            's' => Self::EpochSeconds,
            'Q' => Self::EpochMillis,
            'B' => Self::MonthName,
            'b' | 'h' => Self::MonthAbbrev,
            'A' => Self::WeekdayName,
            'a' => Self::WeekdayAbbrev,
            'F' => Self::IsoDate,
            'D' => Self::UsDate,
            'T' => Self::Time24,
            'R' => Self::HourMinute,
            'r' => Self::Time12,
            'c' => Self::DateTime,
            _ => return None,
        };
        Some(field)
    }

    /// The `strftime` directive producing this field, if there is one.
    fn directive(self) -> Option<&'static str> {
        let directive = match self {
            Self::Year => "%Y",
            Self::YearOfCentury => "%y",
            Self::Century => "%02C",
            Self::Month => "%m",
            Self::Day => "%d",
            Self::DayUnpadded => "%-d",
            Self::DayOfYear => "%j",
            Self::Hour24 => "%H",
            Self::Hour24Unpadded => "%-H",
            Self::Hour12 => "%I",
            Self::Hour12Unpadded => "%-I",
            Self::Minute => "%M",
            Self::Second => "%S",
            Self::Millisecond => "%3f",
            Self::Nanosecond => "%9f",
            Self::Meridiem => "%P",
            Self::Offset => "%z",
            Self::ZoneAbbrev => "%Z",
            Self::EpochSeconds => "%s",
            // strftime's %Q is the zone name
            Self::EpochMillis => return None,
            Self::MonthName => "%B",
            Self::MonthAbbrev => "%b",
            Self::WeekdayName => "%A",
            Self::WeekdayAbbrev => "%a",
            Self::IsoDate => "%F",
            Self::UsDate => "%m/%d/%y",
            Self::Time24 => "%T",
            Self::HourMinute => "%R",
            Self::Time12 => "%I:%M:%S %p",
            Self::DateTime => "%a %b %d %T %Z %Y",
        };
        Some(directive)
    }

    fn write(self, out: &mut String, zoned: &Zoned) {
        // every directive above formats a Zoned without error
        let _ = match self.directive() {
            Some(directive) => write!(out, "{}", zoned.strftime(directive)),
            None => write!(out, "{}", zoned.timestamp().as_millisecond()),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Decimal,
    Hex,
    Octal,
    Text,
    Date(DateField),
}

impl Conversion {
    fn accepts(self, argument: Argument) -> bool {
        match (self, argument) {
            (Self::Text, _) => true,
            (Self::Decimal | Self::Hex | Self::Octal, Argument::Counter) => true,
            (Self::Date(_), Argument::Timestamp) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    left_justify: bool,
    zero_pad: bool,
    plus: bool,
    space: bool,
    grouping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    argument: Argument,
    conversion: Conversion,
    upper: bool,
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A compiled, validated serial code template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCodeTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl SerialCodeTemplate {
    /// Compiles `template`, checking every specifier against its argument.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        Parser::new(template).parse()
    }

    /// The template text this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the template. Identical inputs always give identical output.
    pub fn render(&self, counter: i64, timestamp: Timestamp, time_zone: &TimeZone) -> SerialCode {
        let mut zoned: Option<Zoned> = None;
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => match field.argument {
                    Argument::Counter => render_counter(&mut out, field, counter),
                    Argument::Timestamp => {
                        let zoned =
                            zoned.get_or_insert_with(|| timestamp.to_zoned(time_zone.clone()));
                        render_timestamp(&mut out, field, zoned);
                    }
                },
            }
        }
        SerialCode::new(out)
    }
}

fn render_counter(out: &mut String, field: &Field, counter: i64) {
    let body = match field.conversion {
        Conversion::Decimal => {
            let digits = counter.unsigned_abs().to_string();
            let digits = if field.flags.grouping {
                group_thousands(&digits)
            } else {
                digits
            };
            let sign = if counter < 0 {
                "-"
            } else if field.flags.plus {
                "+"
            } else if field.flags.space {
                " "
            } else {
                ""
            };
            return pad_number(out, field, sign, &digits);
        }
        Conversion::Hex => format!("{counter:x}"),
        Conversion::Octal => format!("{counter:o}"),
        Conversion::Text => counter.to_string(),
        Conversion::Date(_) => unreachable!("rejected at parse time"),
    };

    if field.conversion == Conversion::Text {
        pad_text(out, field, &body);
    } else {
        pad_number(out, field, "", &body);
    }
}

fn render_timestamp(out: &mut String, field: &Field, zoned: &Zoned) {
    let mut body = String::new();
    match field.conversion {
        Conversion::Date(date) => date.write(&mut body, zoned),
        Conversion::Text => {
            let _ = write!(
                body,
                "{}",
                zoned.timestamp().display_with_offset(zoned.offset())
            );
        }
        _ => unreachable!("rejected at parse time"),
    }
    pad_text(out, field, &body);
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

fn pad_number(out: &mut String, field: &Field, sign: &str, digits: &str) {
    let len = sign.len() + digits.len();
    let fill = field.width.unwrap_or(0).saturating_sub(len);
    if field.flags.left_justify {
        out.push_str(sign);
        out.push_str(digits);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if field.flags.zero_pad {
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(sign);
        out.push_str(digits);
    }
    if field.upper {
        upper_tail(out, len + fill);
    }
}

fn pad_text(out: &mut String, field: &Field, text: &str) {
    let text = match field.precision {
        Some(precision) => match text.char_indices().nth(precision) {
            Some((end, _)) => &text[..end],
            None => text,
        },
        None => text,
    };
    let fill = field.width.unwrap_or(0).saturating_sub(text.chars().count());
    let start = out.len();
    if field.flags.left_justify {
        out.push_str(text);
        out.extend(std::iter::repeat(' ').take(fill));
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(text);
    }
    if field.upper {
        let tail = out.split_off(start);
        out.push_str(&tail.to_uppercase());
    }
}

fn upper_tail(out: &mut String, len: usize) {
    let tail = out.split_off(out.len() - len);
    out.push_str(&tail.to_ascii_uppercase());
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    next_ordinary: usize,
    previous: Option<Argument>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
            next_ordinary: 1,
            previous: None,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.source.len(), |&(offset, _)| offset)
    }

    fn number(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        let digits: String = self.chars[start..self.pos].iter().map(|&(_, c)| c).collect();
        // absurdly long digit runs saturate and fail the range checks later
        Some(digits.parse().unwrap_or(usize::MAX))
    }

    fn parse(mut self) -> Result<SerialCodeTemplate, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            if c != '%' {
                literal.push(c);
                self.pos += 1;
                continue;
            }

            let at = self.offset();
            self.pos += 1;
            match self.peek() {
                Some('%') => {
                    literal.push('%');
                    self.pos += 1;
                }
                Some('n') => {
                    literal.push('\n');
                    self.pos += 1;
                }
                Some(_) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(self.field(at)?));
                }
                None => return Err(TemplateError::Truncated { offset: at }),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let renders_counter = segments.iter().any(|segment| {
            matches!(segment, Segment::Field(field) if field.argument == Argument::Counter)
        });
        if !renders_counter {
            return Err(TemplateError::CounterNotRendered);
        }

        Ok(SerialCodeTemplate {
            source: self.source.to_string(),
            segments,
        })
    }

    fn field(&mut self, at: usize) -> Result<Field, TemplateError> {
        // explicit `n$` index, or digits that turn out to be a width
        let checkpoint = self.pos;
        let mut explicit = None;
        if let Some(index) = self.number() {
            if self.peek() == Some('$') {
                self.pos += 1;
                explicit = Some(index);
            } else {
                self.pos = checkpoint;
            }
        }

        let mut flags = Flags::default();
        let mut relative = false;
        while let Some(c) = self.peek() {
            match c {
                '-' => flags.left_justify = true,
                '0' => flags.zero_pad = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                ',' => flags.grouping = true,
                '<' => relative = true,
                _ => break,
            }
            self.pos += 1;
        }

        let width = self.number();
        let precision = if self.peek() == Some('.') {
            self.pos += 1;
            Some(
                self.number()
                    .ok_or(TemplateError::Truncated { offset: at })?,
            )
        } else {
            None
        };

        let (conversion, upper) = match self.peek() {
            Some(t @ ('t' | 'T')) => {
                self.pos += 1;
                let suffix = self.peek().ok_or(TemplateError::Truncated { offset: at })?;
                self.pos += 1;
                let field = DateField::from_suffix(suffix).ok_or(
                    TemplateError::UnknownConversion {
                        offset: at,
                        conversion: format!("{t}{suffix}"),
                    },
                )?;
                (Conversion::Date(field), t == 'T')
            }
            Some(c) => {
                self.pos += 1;
                match c {
                    'd' => (Conversion::Decimal, false),
                    'x' => (Conversion::Hex, false),
                    'X' => (Conversion::Hex, true),
                    'o' => (Conversion::Octal, false),
                    's' => (Conversion::Text, false),
                    'S' => (Conversion::Text, true),
                    other => {
                        return Err(TemplateError::UnknownConversion {
                            offset: at,
                            conversion: other.to_string(),
                        });
                    }
                }
            }
            None => return Err(TemplateError::Truncated { offset: at }),
        };

        let argument = self.argument(at, explicit, relative)?;
        self.previous = Some(argument);

        if !conversion.accepts(argument) {
            return Err(TemplateError::TypeMismatch {
                offset: at,
                argument,
            });
        }
        self.check_flags(at, conversion, flags, width, precision)?;

        Ok(Field {
            argument,
            conversion,
            upper,
            flags,
            width,
            precision,
        })
    }

    fn argument(
        &mut self,
        at: usize,
        explicit: Option<usize>,
        relative: bool,
    ) -> Result<Argument, TemplateError> {
        if relative {
            return self
                .previous
                .ok_or(TemplateError::NoPreviousArgument { offset: at });
        }
        let index = match explicit {
            Some(index) => index,
            None => {
                let index = self.next_ordinary;
                self.next_ordinary += 1;
                index
            }
        };
        Argument::from_index(index).ok_or(TemplateError::ArgumentOutOfRange { offset: at, index })
    }

    fn check_flags(
        &self,
        at: usize,
        conversion: Conversion,
        flags: Flags,
        width: Option<usize>,
        precision: Option<usize>,
    ) -> Result<(), TemplateError> {
        let invalid = |reason: &str| {
            Err(TemplateError::InvalidFlags {
                offset: at,
                reason: reason.to_string(),
            })
        };

        if (flags.left_justify || flags.zero_pad) && width.is_none() {
            return invalid("'-' and '0' need a width");
        }
        if flags.left_justify && flags.zero_pad {
            return invalid("'-' and '0' are mutually exclusive");
        }
        if flags.plus && flags.space {
            return invalid("'+' and ' ' are mutually exclusive");
        }
        if (flags.plus || flags.space || flags.grouping) && conversion != Conversion::Decimal {
            return invalid("'+', ' ' and ',' only apply to %d");
        }
        if flags.zero_pad
            && !matches!(
                conversion,
                Conversion::Decimal | Conversion::Hex | Conversion::Octal
            )
        {
            return invalid("'0' only applies to numeric conversions");
        }
        if precision.is_some() && conversion != Conversion::Text {
            return invalid("precision only applies to %s");
        }
        Ok(())
    }
}
