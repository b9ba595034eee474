//! Content negotiation: which body format a client sent, how each resource
//! decodes it, and which format the response goes back in.

use std::collections::HashMap;

use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::media::{parse_accept, parse_media_type};
use crate::model::{CommonFields, FileGroup, Link, Resource, Text};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// Bytes inspected for a `=` before trusting a form-encoded header.
const FORM_PEEK: usize = 15;
/// Bytes inspected when guessing between JSON and raw text.
const SNIFF_PEEK: usize = 5;

/// Query string parameters of a request.
pub type Params = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    RawText,
    FormEncoded,
    Structured,
    /// A content type no resource knows how to read.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    RawText,
    Structured,
}

// ── Request side ────────────────────────────────────────────

/// Decide how to read a request body from its `Content-Type` header, falling
/// back to sniffing the first bytes.
///
/// `curl -d` labels every body as form-encoded, so that header is only
/// believed when a `=` shows up near the start of the body.
pub fn resolve_body_format(content_type: Option<&str>, body: &[u8]) -> BodyFormat {
    match content_type.and_then(parse_media_type) {
        Some(m) if m.is("text", "plain") => BodyFormat::RawText,
        Some(m) if m.is("application", "json") => BodyFormat::Structured,
        Some(m) if m.is("application", "x-www-form-urlencoded") => {
            if body.iter().take(FORM_PEEK).any(|&b| b == b'=') {
                BodyFormat::FormEncoded
            } else {
                sniff(body)
            }
        }
        Some(_) => BodyFormat::Unknown,
        None => sniff(body),
    }
}

fn sniff(body: &[u8]) -> BodyFormat {
    let head = &body[..body.len().min(SNIFF_PEEK)];
    match head.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => BodyFormat::Structured,
        _ => BodyFormat::RawText,
    }
}

fn truthy(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "t"
    )
}

/// Fill `burn`, `ttl` and `hidden` from query parameters. These are never
/// read from the body, whatever its format.
pub fn apply_common_params(common: &mut CommonFields, params: &Params) {
    common.burn_after_read = params.get("burn").is_some_and(|v| truthy(v));
    common.hidden = params.get("hidden").is_some_and(|v| truthy(v));
    common.ttl = params
        .get("ttl")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|ttl| *ttl > 0)
        .unwrap_or(0);
}

/// First value of `field` in a form-encoded body, or empty.
fn form_value(body: &[u8], field: &str) -> Result<String> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(body).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(pairs
        .into_iter()
        .find(|(k, _)| k == field)
        .map(|(_, v)| v)
        .unwrap_or_default())
}

fn utf8(body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|_| Error::Decode("body is not valid UTF-8".into()))
}

/// Per-resource body handling. Each implementation matches every
/// [`BodyFormat`], so adding a format is a compile error until every
/// resource handles it.
pub trait Negotiate: Resource {
    /// Populate the resource's own fields from the request body. Common
    /// fields are already set by the time this runs.
    fn decode_body(&mut self, format: BodyFormat, body: &[u8], codec: &Codec) -> Result<()>;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Raw-text rendering, if this resource has a primary field.
    fn primary_text(&self) -> Option<String>;
}

#[derive(Deserialize)]
struct TextBody {
    #[serde(default)]
    text: String,
}

impl Negotiate for Text {
    fn decode_body(&mut self, format: BodyFormat, body: &[u8], codec: &Codec) -> Result<()> {
        match format {
            BodyFormat::RawText => self.text = utf8(body)?,
            BodyFormat::FormEncoded => self.text = form_value(body, "text")?,
            BodyFormat::Structured => self.text = codec.decode::<TextBody>(body)?.text,
            BodyFormat::Unknown => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(Error::Validation("text is empty".into()));
        }
        Ok(())
    }

    fn primary_text(&self) -> Option<String> {
        Some(self.text.clone())
    }
}

#[derive(Deserialize)]
struct LinkBody {
    #[serde(default)]
    url: String,
}

impl Negotiate for Link {
    fn decode_body(&mut self, format: BodyFormat, body: &[u8], codec: &Codec) -> Result<()> {
        self.url = match format {
            BodyFormat::RawText => {
                let mut url = utf8(body)?;
                // `echo $url | curl --data-binary @-` leaves one newline behind
                if url.ends_with('\n') {
                    url.pop();
                    if url.ends_with('\r') {
                        url.pop();
                    }
                }
                url
            }
            BodyFormat::FormEncoded => form_value(body, "url")?,
            BodyFormat::Structured => codec.decode::<LinkBody>(body)?.url,
            BodyFormat::Unknown => String::new(),
        };
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Validation("url is empty".into()));
        }
        Ok(())
    }

    fn primary_text(&self) -> Option<String> {
        Some(format!("{}\n", self.url))
    }
}

impl Negotiate for FileGroup {
    fn decode_body(&mut self, format: BodyFormat, body: &[u8], codec: &Codec) -> Result<()> {
        match format {
            // groups carry no client-supplied content, but a JSON body must
            // still be well formed
            BodyFormat::Structured if !body.iter().all(u8::is_ascii_whitespace) => {
                codec.decode::<IgnoredAny>(body)?;
            }
            BodyFormat::Structured
            | BodyFormat::RawText
            | BodyFormat::FormEncoded
            | BodyFormat::Unknown => {}
        }
        self.files.clear();
        Ok(())
    }

    fn primary_text(&self) -> Option<String> {
        None
    }
}

/// A create request, stripped of its transport.
#[derive(Debug, Clone, Copy)]
pub struct CreateRequest<'a> {
    pub content_type: Option<&'a str>,
    pub params: &'a Params,
    pub body: &'a [u8],
}

/// Run exactly one body handler for `R` and validate the result.
pub fn decode_create<R: Negotiate>(req: &CreateRequest<'_>, codec: &Codec) -> Result<(R, BodyFormat)> {
    let format = resolve_body_format(req.content_type, req.body);
    let kind = R::KIND;
    tracing::debug!(%kind, ?format, content_type = ?req.content_type, "resolved body format");

    let mut record = R::default();
    apply_common_params(record.common_mut(), req.params);
    record.decode_body(format, req.body, codec)?;
    record.validate()?;
    Ok((record, format))
}

// ── Response side ───────────────────────────────────────────

/// Pick the response encoding. An absent or wildcard `Accept` echoes the
/// format the request body arrived in.
pub fn response_format(accept: Option<&str>, request: Option<BodyFormat>) -> ResponseFormat {
    let echo = match request {
        Some(BodyFormat::RawText) => ResponseFormat::RawText,
        _ => ResponseFormat::Structured,
    };

    for range in parse_accept(accept.unwrap_or_default()) {
        if range.is_wildcard() {
            return echo;
        }
        if range.main == "text" && (range.sub == "plain" || range.sub == "*") {
            return ResponseFormat::RawText;
        }
        if range.main == "application" && (range.sub == "json" || range.sub == "*") {
            return ResponseFormat::Structured;
        }
    }

    if accept.map_or(true, |a| a.trim().is_empty()) {
        echo
    } else {
        ResponseFormat::Structured
    }
}

/// Encoded response body plus the content type describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// Encode a fetched record.
pub fn encode_record<R: Negotiate>(record: &R, format: ResponseFormat, codec: &Codec) -> Result<Encoded> {
    if format == ResponseFormat::RawText {
        if let Some(text) = record.primary_text() {
            return Ok(Encoded {
                content_type: TEXT_PLAIN,
                body: text.into_bytes(),
            });
        }
    }
    Ok(Encoded {
        content_type: APPLICATION_JSON,
        body: codec.encode(record)?,
    })
}

/// Encode a freshly created record: its URL in raw-text mode, the full
/// record otherwise.
pub fn encode_created<R: Negotiate>(
    record: &R,
    format: ResponseFormat,
    host: &str,
    codec: &Codec,
) -> Result<Encoded> {
    match format {
        ResponseFormat::RawText => Ok(Encoded {
            content_type: TEXT_PLAIN,
            body: format!(
                "http://{}/{}/{}\n",
                host,
                R::KIND.route(),
                record.common().id
            )
            .into_bytes(),
        }),
        ResponseFormat::Structured => Ok(Encoded {
            content_type: APPLICATION_JSON,
            body: codec.encode(record)?,
        }),
    }
}

#[derive(serde::Serialize)]
struct Listing<'a> {
    data: Vec<&'a RawValue>,
}

/// Wrap already-serialized items as `{"data":[...]}`.
pub fn encode_listing(items: &[Vec<u8>], codec: &Codec) -> Result<Vec<u8>> {
    let data = items
        .iter()
        .map(|item| {
            serde_json::from_slice::<&RawValue>(item)
                .map_err(|e| Error::Storage(format!("stored record is not JSON: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;
    codec.encode(&Listing { data })
}
