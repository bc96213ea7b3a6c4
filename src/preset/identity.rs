use serde::{Deserialize, Serialize};

/// One of the metadata fields a preset can be keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Title,
    Artist,
    Album,
    Genre,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Genre => "genre",
        }
    }
}

impl std::fmt::Display for IdentityField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is currently playing, as far as preset lookup is concerned.
///
/// Values are matched exactly. An empty string counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

impl MediaIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: IdentityField) -> Option<&str> {
        let value = match field {
            IdentityField::Title => &self.title,
            IdentityField::Artist => &self.artist,
            IdentityField::Album => &self.album,
            IdentityField::Genre => &self.genre,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// First of `fields` that is absent, if any.
    pub fn first_missing(&self, fields: &[IdentityField]) -> Option<IdentityField> {
        fields.iter().copied().find(|&f| self.get(f).is_none())
    }

    pub fn is_empty(&self) -> bool {
        [
            IdentityField::Title,
            IdentityField::Artist,
            IdentityField::Album,
            IdentityField::Genre,
        ]
        .iter()
        .all(|&f| self.get(f).is_none())
    }
}

#[cfg(test)]
impl MediaIdentity {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }
}

impl std::fmt::Display for MediaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let artist = self.get(IdentityField::Artist).unwrap_or("?");
        let title = self.get(IdentityField::Title).unwrap_or("?");
        write!(f, "{} - {}", artist, title)?;
        if let Some(album) = self.get(IdentityField::Album) {
            write!(f, " [{}]", album)?;
        }
        Ok(())
    }
}
