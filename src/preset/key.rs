use serde::{Deserialize, Serialize};

use super::identity::{IdentityField, MediaIdentity};

/// Namespace shared by every key this crate writes.
pub const KEY_PREFIX: &str = "PRESET:MUSIC";

/// Precedence level / storage class of a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresetKind {
    Home,
    Genre,
    Artist,
    Release,
    Track,
    Template,
    /// A template chosen as the fallback. Only appears in resolution results.
    Target,
}

impl PresetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "HOME",
            Self::Genre => "GENRE",
            Self::Artist => "ARTIST",
            Self::Release => "RELEASE",
            Self::Track => "TRACK",
            Self::Template => "TEMPLATE",
            Self::Target => "TARGET",
        }
    }

    /// Identity fields a key of this kind is built from.
    pub fn required_fields(&self) -> &'static [IdentityField] {
        use IdentityField::*;
        match self {
            Self::Track => &[Artist, Album, Title],
            Self::Release => &[Artist, Album],
            Self::Artist => &[Artist],
            Self::Genre => &[Genre],
            Self::Home | Self::Template | Self::Target => &[],
        }
    }
}

impl std::fmt::Display for PresetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage identity of a preset.
///
/// Each variant carries exactly the fields its kind needs, so a key that
/// exists is always complete. Encoded as `PRESET:MUSIC<KIND><field>...` with
/// `\`, `<` and `>` escaped inside fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresetKey {
    Home,
    Genre {
        genre: String,
    },
    Artist {
        artist: String,
    },
    Release {
        artist: String,
        album: String,
    },
    Track {
        artist: String,
        album: String,
        title: String,
    },
    Template {
        name: String,
    },
}

impl PresetKey {
    /// Derive the key of `kind` for `identity`. `None` when a required field
    /// is missing, or for kinds that are not derived from media metadata.
    pub fn for_kind(kind: PresetKind, identity: &MediaIdentity) -> Option<Self> {
        let field = |f| identity.get(f).map(str::to_string);
        let key = match kind {
            PresetKind::Home => Self::Home,
            PresetKind::Genre => Self::Genre {
                genre: field(IdentityField::Genre)?,
            },
            PresetKind::Artist => Self::Artist {
                artist: field(IdentityField::Artist)?,
            },
            PresetKind::Release => Self::Release {
                artist: field(IdentityField::Artist)?,
                album: field(IdentityField::Album)?,
            },
            PresetKind::Track => Self::Track {
                artist: field(IdentityField::Artist)?,
                album: field(IdentityField::Album)?,
                title: field(IdentityField::Title)?,
            },
            PresetKind::Template | PresetKind::Target => return None,
        };
        Some(key)
    }

    pub fn template(name: impl Into<String>) -> Self {
        Self::Template { name: name.into() }
    }

    pub fn kind(&self) -> PresetKind {
        match self {
            Self::Home => PresetKind::Home,
            Self::Genre { .. } => PresetKind::Genre,
            Self::Artist { .. } => PresetKind::Artist,
            Self::Release { .. } => PresetKind::Release,
            Self::Track { .. } => PresetKind::Track,
            Self::Template { .. } => PresetKind::Template,
        }
    }

    fn fields(&self) -> Vec<&str> {
        match self {
            Self::Home => vec![],
            Self::Genre { genre } => vec![genre.as_str()],
            Self::Artist { artist } => vec![artist.as_str()],
            Self::Release { artist, album } => vec![artist.as_str(), album.as_str()],
            Self::Track {
                artist,
                album,
                title,
            } => vec![artist.as_str(), album.as_str(), title.as_str()],
            Self::Template { name } => vec![name.as_str()],
        }
    }

    /// Storage key string.
    pub fn encode(&self) -> String {
        let mut out = String::from(KEY_PREFIX);
        push_segment(&mut out, self.kind().as_str());
        for field in self.fields() {
            push_segment(&mut out, field);
        }
        out
    }

    /// Inverse of [`PresetKey::encode`]. `None` for foreign or malformed keys.
    pub fn decode(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(KEY_PREFIX)?;
        let segments = split_segments(rest)?;
        let (tag, fields) = segments.split_first()?;

        let key = match (tag.as_str(), fields) {
            ("HOME", []) => Self::Home,
            ("GENRE", [genre]) => Self::Genre {
                genre: genre.clone(),
            },
            ("ARTIST", [artist]) => Self::Artist {
                artist: artist.clone(),
            },
            ("RELEASE", [artist, album]) => Self::Release {
                artist: artist.clone(),
                album: album.clone(),
            },
            ("TRACK", [artist, album, title]) => Self::Track {
                artist: artist.clone(),
                album: album.clone(),
                title: title.clone(),
            },
            ("TEMPLATE", [name]) => Self::Template { name: name.clone() },
            _ => return None,
        };
        Some(key)
    }

    /// Human-readable name, used as the title of saved records.
    pub fn label(&self) -> String {
        match self {
            Self::Home => "Home".to_string(),
            Self::Genre { genre } => format!("Genre: {}", genre),
            Self::Artist { artist } => format!("Artist: {}", artist),
            Self::Release { artist, album } => format!("Album: {} / {}", artist, album),
            Self::Track {
                artist,
                album,
                title,
            } => format!("Track: {} / {} / {}", artist, album, title),
            Self::Template { name } => name.clone(),
        }
    }
}

impl std::fmt::Display for PresetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn push_segment(out: &mut String, value: &str) {
    out.push('<');
    for c in value.chars() {
        if matches!(c, '\\' | '<' | '>') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('>');
}

/// Split `<a><b\>c>` into `["a", "b>c"]`. Rejects anything between or after segments.
fn split_segments(s: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut chars = s.chars();

    while let Some(open) = chars.next() {
        if open != '<' {
            return None;
        }
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\\' => value.push(chars.next()?),
                '>' => break,
                '<' => return None,
                c => value.push(c),
            }
        }
        segments.push(value);
    }
    Some(segments)
}
