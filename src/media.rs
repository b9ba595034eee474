//! Media type parsing for `Content-Type` and `Accept` header values.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, opt},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    pub main: String,
    pub sub: String,
    pub params: Vec<(String, String)>,
}

impl MediaType {
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }

    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main == main && self.sub == sub
    }

    pub fn is_wildcard(&self) -> bool {
        self.main == "*" && self.sub == "*"
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Quality weight of an `Accept` range, 1.0 when absent or malformed.
    pub fn quality(&self) -> f32 {
        self.param("q")
            .and_then(|q| q.parse::<f32>().ok())
            .filter(|q| (0.0..=1.0).contains(q))
            .unwrap_or(1.0)
    }
}

fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn token(i: &str) -> IResult<&str, &str> {
    take_while1(is_tchar)(i)
}

fn quoted(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(i)
}

fn param(i: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        tuple((multispace0, char(';'), multispace0)),
        separated_pair(token, char('='), alt((quoted, token))),
    )(i)
}

fn media_type(i: &str) -> IResult<&str, MediaType> {
    let (i, (main, sub)) = separated_pair(token, char('/'), token)(i)?;
    let (i, params) = many0(param)(i)?;
    let (i, _) = opt(preceded(multispace0, char(';')))(i)?;
    let media = MediaType {
        main: main.to_ascii_lowercase(),
        sub: sub.to_ascii_lowercase(),
        params: params
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect(),
    };
    Ok((i, media))
}

/// Parse a single media type such as `text/plain; charset=utf-8`.
/// Returns `None` for anything that is not a well-formed `type/subtype`.
pub fn parse_media_type(s: &str) -> Option<MediaType> {
    all_consuming(delimited(multispace0, media_type, multispace0))(s)
        .ok()
        .map(|(_, m)| m)
}

/// Parse an `Accept` header into media ranges ordered by preference.
/// Malformed ranges and ranges with `q=0` are dropped.
pub fn parse_accept(s: &str) -> Vec<MediaType> {
    let mut ranges: Vec<MediaType> = s
        .split(',')
        .filter_map(parse_media_type)
        .filter(|m| m.quality() > 0.0)
        .collect();
    // stable, so equal weights keep header order
    ranges.sort_by(|a, b| b.quality().total_cmp(&a.quality()));
    ranges
}

/// Strip parameters, leaving `type/subtype` lowercased.
pub fn essence_of(s: &str) -> Option<String> {
    terminated(media_type, multispace0)(s.trim_start())
        .ok()
        .map(|(_, m)| m.essence())
}
