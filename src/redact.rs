use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::model::{FileGroup, Kind, Text};

/// Strip the sensitive part of a burn-flagged record before it appears in a
/// listing. Listing is not a read, so the record itself stays untouched.
pub fn redact(kind: Kind, payload: &[u8], codec: &Codec) -> Result<Vec<u8>> {
    match kind {
        Kind::Text => {
            let mut text: Text = codec.decode(payload)?;
            text.text.clear();
            codec.encode(&text)
        }
        // the url is listed as-is, see DESIGN.md
        Kind::Link => Ok(payload.to_vec()),
        Kind::FileGroup => {
            let mut group: FileGroup = codec.decode(payload)?;
            group.files.clear();
            codec.encode(&group)
        }
        Kind::File => Err(Error::CannotRedact(Kind::File)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{File, Link};

    #[test]
    fn test_text_cleared() {
        let codec = Codec::default();
        let mut t = Text::default();
        t.common.id = "a1".into();
        t.text = "secret".into();
        let out = redact(Kind::Text, &codec.encode(&t).unwrap(), &codec).unwrap();
        let back: Text = codec.decode(&out).unwrap();
        assert_eq!(back.common.id, "a1");
        assert!(back.text.is_empty());
    }

    #[test]
    fn test_link_untouched() {
        let codec = Codec::default();
        let mut l = Link::default();
        l.url = "https://example.com".into();
        let raw = codec.encode(&l).unwrap();
        assert_eq!(redact(Kind::Link, &raw, &codec).unwrap(), raw);
    }

    #[test]
    fn test_group_files_cleared() {
        let codec = Codec::default();
        let mut g = FileGroup::default();
        g.files.push(File {
            id: "f1".into(),
            ..Default::default()
        });
        let out = redact(Kind::FileGroup, &codec.encode(&g).unwrap(), &codec).unwrap();
        let back: FileGroup = codec.decode(&out).unwrap();
        assert!(back.files.is_empty());
    }

    #[test]
    fn test_raw_file_refused() {
        let err = redact(Kind::File, b"\x89PNG", &Codec::default()).unwrap_err();
        assert!(matches!(err, Error::CannotRedact(Kind::File)));
    }
}
