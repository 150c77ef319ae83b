use std::time::Duration;

use chrono::TimeDelta;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, opt, recognize, value},
    multi::many1,
    sequence::pair,
    IResult,
    Parser,
};
use thiserror::Error;

const NANOS_PER_MICRO: f64 = 1e3;
const NANOS_PER_MILLI: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;
const NANOS_PER_MINUTE: f64 = 60.0 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: f64 = 60.0 * NANOS_PER_MINUTE;

/// Parses durations written the way Go's `time.ParseDuration` accepts them:
/// an optional sign followed by one or more `<number><unit>` pairs, such as
/// `5m`, `-1h30m` or `1.5s`. A bare `0` is also accepted.
pub struct DurationParser;

impl DurationParser {
    pub fn parse_str(input: &str) -> Result<TimeDelta, DurationParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DurationParseError::Empty);
        }

        match all_consuming(Self::parse_signed).parse(trimmed) {
            Ok((_, Some(duration))) => Ok(duration),
            Ok((_, None)) => Err(DurationParseError::OutOfRange(trimmed.to_owned())),
            Err(_) => Err(DurationParseError::Invalid(trimmed.to_owned())),
        }
    }

    fn parse_signed(input: &str) -> IResult<&str, Option<TimeDelta>> {
        let (input, sign) = opt(alt((char('-'), char('+')))).parse(input)?;
        let (input, duration) = alt((
            Self::parse_components,
            value(Some(TimeDelta::zero()), char('0')),
        ))
        .parse(input)?;

        Ok((input, duration.map(|d| if sign == Some('-') { -d } else { d })))
    }

    fn parse_components(input: &str) -> IResult<&str, Option<TimeDelta>> {
        let (input, components) = many1(Self::parse_component).parse(input)?;
        let total = components
            .into_iter()
            .try_fold(TimeDelta::zero(), |acc, component| acc.checked_add(&component?));

        Ok((input, total))
    }

    fn parse_component(input: &str) -> IResult<&str, Option<TimeDelta>> {
        let (input, number) = recognize(pair(digit1, opt(pair(char('.'), digit1)))).parse(input)?;
        let (input, unit) = alt((
            value(1.0, tag("ns")),
            value(NANOS_PER_MICRO, alt((tag("us"), tag("µs"), tag("μs")))),
            value(NANOS_PER_MILLI, tag("ms")),
            value(NANOS_PER_SECOND, tag("s")),
            value(NANOS_PER_MINUTE, tag("m")),
            value(NANOS_PER_HOUR, tag("h")),
        ))
        .parse(input)?;

        Ok((input, Self::to_time_delta(number, unit)))
    }

    fn to_time_delta(number: &str, nanos_per_unit: f64) -> Option<TimeDelta> {
        let nanos = (number.parse::<f64>().ok()? * nanos_per_unit).round();
        if !nanos.is_finite() || nanos >= i64::MAX as f64 {
            return None;
        }
        Some(TimeDelta::nanoseconds(nanos as i64))
    }
}

/// clap value parser for durations that may point backwards in time.
pub fn parse_signed_duration(input: &str) -> Result<TimeDelta, DurationParseError> {
    DurationParser::parse_str(input)
}

/// clap value parser for durations that must not be negative.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    DurationParser::parse_str(input)?
        .to_std()
        .map_err(|_| DurationParseError::Negative(input.trim().to_owned()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid duration {0:?}, expected something like 5m, 1h30m or 500ms")]
    Invalid(String),
    #[error("duration {0:?} is out of range")]
    OutOfRange(String),
    #[error("duration {0:?} must not be negative")]
    Negative(String),
}
