//! Mutex-guarded stream metadata, independently patchable per field.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Current "now playing" identity for a mount, plus the static stream
/// identity fields (genre, description, ...) surfaced in `icy-*` headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub url: Option<String>,
    pub genre: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
    pub description: Option<String>,
    pub public: bool,
}

/// A partial update: `None` fields are left untouched on the holder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub url: Option<String>,
    pub genre: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
    pub description: Option<String>,
    pub public: Option<bool>,
}

/// Thread-safe holder for a mount's metadata. Readers get a cloned
/// snapshot; writers only replace the non-empty fields of a patch.
pub struct MetadataHolder {
    inner: Mutex<StreamMetadata>,
}

impl MetadataHolder {
    #[must_use]
    pub fn new(initial: StreamMetadata) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    /// Atomic snapshot of the current metadata.
    #[must_use]
    pub fn snapshot(&self) -> StreamMetadata {
        self.inner.lock().clone()
    }

    /// Replaces only the "now playing" ICY title, leaving every other
    /// field untouched — the common "Now Playing" update path.
    pub fn set_title(&self, title: String) {
        self.inner.lock().title = Some(title);
    }

    /// Applies a patch, replacing only fields the caller actually set.
    pub fn update(&self, patch: MetadataPatch) {
        let mut guard = self.inner.lock();
        if let Some(title) = patch.title {
            guard.title = Some(title);
        }
        if let Some(artist) = patch.artist {
            guard.artist = Some(artist);
        }
        if let Some(album) = patch.album {
            guard.album = Some(album);
        }
        if let Some(url) = patch.url {
            guard.url = Some(url);
        }
        if let Some(genre) = patch.genre {
            guard.genre = Some(genre);
        }
        if let Some(content_type) = patch.content_type {
            guard.content_type = Some(content_type);
        }
        if let Some(bitrate) = patch.bitrate {
            guard.bitrate = Some(bitrate);
        }
        if let Some(description) = patch.description {
            guard.description = Some(description);
        }
        if let Some(public) = patch.public {
            guard.public = public;
        }
    }
}

impl Default for MetadataHolder {
    fn default() -> Self {
        Self::new(StreamMetadata::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_replaces_set_fields() {
        let holder = MetadataHolder::new(StreamMetadata {
            title: Some("Old Title".into()),
            artist: Some("Artist".into()),
            ..Default::default()
        });
        holder.update(MetadataPatch {
            title: Some("New Title".into()),
            ..Default::default()
        });
        let snap = holder.snapshot();
        assert_eq!(snap.title.as_deref(), Some("New Title"));
        assert_eq!(snap.artist.as_deref(), Some("Artist"));
    }

    #[test]
    fn set_title_is_independent_of_other_fields() {
        let holder = MetadataHolder::new(StreamMetadata {
            artist: Some("Artist".into()),
            ..Default::default()
        });
        holder.set_title("Now Playing".into());
        let snap = holder.snapshot();
        assert_eq!(snap.title.as_deref(), Some("Now Playing"));
        assert_eq!(snap.artist.as_deref(), Some("Artist"));
    }
}
