use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Resource kind, doubling as the one-byte key prefix that partitions the
/// flat key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    File,
    FileGroup,
    Text,
    Link,
}

impl Kind {
    pub const fn tag(self) -> u8 {
        match self {
            Kind::File => b'f',
            Kind::FileGroup => b'g',
            Kind::Text => b't',
            Kind::Link => b'l',
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Kind> {
        match tag {
            b'f' => Some(Kind::File),
            b'g' => Some(Kind::FileGroup),
            b't' => Some(Kind::Text),
            b'l' => Some(Kind::Link),
            _ => None,
        }
    }

    /// Path segment clients use to address this kind.
    pub const fn route(self) -> &'static str {
        match self {
            Kind::File | Kind::FileGroup => "file",
            Kind::Text => "text",
            Kind::Link => "link",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::File => "file",
            Kind::FileGroup => "group",
            Kind::Text => "text",
            Kind::Link => "link",
        };
        f.write_str(name)
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Kind::File),
            "group" => Ok(Kind::FileGroup),
            "text" => Ok(Kind::Text),
            "link" => Ok(Kind::Link),
            other => Err(format!("unknown kind: {}", other)),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Fields shared by every client-addressable resource. `id` and `created`
/// are assigned by the server and never taken from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonFields {
    #[serde(rename = "burn", skip_serializing_if = "is_false")]
    pub burn_after_read: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub hidden: bool,
    /// Seconds until expiry; zero means never.
    #[serde(skip_serializing_if = "is_zero")]
    pub ttl: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Unix timestamp, seconds.
    #[serde(skip_serializing_if = "is_zero")]
    pub created: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Text {
    #[serde(flatten)]
    pub common: CommonFields,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    #[serde(flatten)]
    pub common: CommonFields,
    pub url: String,
}

/// Descriptor of one uploaded blob. The bytes live in their own record under
/// [`Kind::File`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct File {
    pub id: String,
    /// Multipart form field the file arrived in.
    pub name: String,
    pub filename: String,
    pub mime: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGroup {
    #[serde(flatten)]
    pub common: CommonFields,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

/// A structured record that clients create, read and delete by id.
pub trait Resource: Serialize + DeserializeOwned + Default + Send + Sync {
    const KIND: Kind;

    fn common(&self) -> &CommonFields;

    fn common_mut(&mut self) -> &mut CommonFields;
}

impl Resource for Text {
    const KIND: Kind = Kind::Text;

    fn common(&self) -> &CommonFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonFields {
        &mut self.common
    }
}

impl Resource for Link {
    const KIND: Kind = Kind::Link;

    fn common(&self) -> &CommonFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonFields {
        &mut self.common
    }
}

impl Resource for FileGroup {
    const KIND: Kind = Kind::FileGroup;

    fn common(&self) -> &CommonFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonFields {
        &mut self.common
    }
}
