//! Voice identifiers and their resolution to backing resources.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extension of precomputed embedding artifacts in the uploads directory.
pub const EMBEDDING_EXTENSION: &str = "safetensors";

/// Raw audio containers accepted for uploaded voices, in probe order.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg"];

/// Canonical identifier of a voice resource after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceKey(String);

impl VoiceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key names a file rather than a catalog entry.
    pub fn is_path(&self) -> bool {
        has_separator(&self.0)
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for VoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for VoiceKey {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceKind {
    Premade,
    Custom,
    CustomEmbedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VoiceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub cached: bool,
}

/// An uploaded asset found in the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVoice {
    pub name: String,
    pub kind: VoiceKind,
    pub key: VoiceKey,
}

fn has_separator(id: &str) -> bool {
    id.contains('/') || id.contains('\\')
}

/// Maps user-facing voice identifiers to canonical [`VoiceKey`]s.
#[derive(Debug, Clone)]
pub struct VoiceResolver {
    catalog: Vec<String>,
    uploads_dir: PathBuf,
}

impl VoiceResolver {
    pub fn new(catalog: Vec<String>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn is_premade(&self, voice_id: &str) -> bool {
        self.catalog.iter().any(|name| name == voice_id)
    }

    /// Resolve an identifier.
    ///
    /// Paths and catalog names are returned as-is. Other names are looked up in
    /// the uploads directory, preferring an embedding artifact over raw audio.
    /// Unknown names pass through unchanged so the load path can report them.
    pub fn resolve(&self, voice_id: &str) -> VoiceKey {
        if has_separator(voice_id) || self.is_premade(voice_id) {
            return VoiceKey::new(voice_id);
        }

        let candidates = std::iter::once(EMBEDDING_EXTENSION).chain(AUDIO_EXTENSIONS.iter().copied());
        for ext in candidates {
            let path = self.upload_path(voice_id, ext);
            if path.exists() {
                debug!(voice = voice_id, path = %path.display(), "resolved uploaded voice");
                return VoiceKey::from(path.as_path());
            }
        }

        VoiceKey::new(voice_id)
    }

    /// Path of an uploaded asset for `name` with the given extension.
    pub fn upload_path(&self, name: &str, ext: &str) -> PathBuf {
        self.uploads_dir.join(format!("{name}.{ext}"))
    }

    /// Uploaded raw audio and embedding artifacts, sorted by name.
    pub fn list_uploads(&self) -> Vec<UploadedVoice> {
        let Ok(entries) = fs::read_dir(&self.uploads_dir) else {
            return Vec::new();
        };

        let mut uploads: Vec<UploadedVoice> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_stem()?.to_str()?.to_string();
                let ext = path.extension()?.to_str()?.to_ascii_lowercase();
                let kind = if ext == EMBEDDING_EXTENSION {
                    VoiceKind::CustomEmbedding
                } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                    VoiceKind::Custom
                } else {
                    return None;
                };
                let key = VoiceKey::from(self.upload_path(&name, &ext).as_path());
                Some(UploadedVoice { name, kind, key })
            })
            .collect();

        uploads.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.as_str().cmp(b.key.as_str())));
        uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(dir: &Path) -> VoiceResolver {
        VoiceResolver::new(vec!["alba".into(), "marius".into()], dir)
    }

    #[test]
    fn premade_voice_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolver(dir.path()).resolve("alba"), VoiceKey::new("alba"));
    }

    #[test]
    fn premade_name_wins_over_upload_with_same_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alba.wav"), b"RIFF").unwrap();
        assert_eq!(resolver(dir.path()).resolve("alba"), VoiceKey::new("alba"));
    }

    #[test]
    fn path_identifiers_are_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path());
        assert_eq!(r.resolve("voices/x.wav"), VoiceKey::new("voices/x.wav"));
        assert_eq!(r.resolve(r"C:\voices\x.wav"), VoiceKey::new(r"C:\voices\x.wav"));
        assert!(r.resolve("voices/x.wav").is_path());
    }

    #[test]
    fn embedding_is_preferred_over_raw_audio() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bob.wav"), b"RIFF").unwrap();
        fs::write(dir.path().join("bob.safetensors"), b"{}").unwrap();

        let key = resolver(dir.path()).resolve("bob");
        assert_eq!(key, VoiceKey::from(dir.path().join("bob.safetensors").as_path()));
    }

    #[test]
    fn raw_audio_probed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("eve.ogg"), b"OggS").unwrap();
        fs::write(dir.path().join("eve.mp3"), b"ID3").unwrap();

        let key = resolver(dir.path()).resolve("eve");
        assert_eq!(key, VoiceKey::from(dir.path().join("eve.mp3").as_path()));
    }

    #[test]
    fn unknown_voice_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolver(dir.path()).resolve("nobody"), VoiceKey::new("nobody"));
    }

    #[test]
    fn list_uploads_classifies_assets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bob.wav"), b"RIFF").unwrap();
        fs::write(dir.path().join("bob.safetensors"), b"{}").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let uploads = resolver(dir.path()).list_uploads();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().any(|u| u.kind == VoiceKind::Custom && u.name == "bob"));
        assert!(uploads
            .iter()
            .any(|u| u.kind == VoiceKind::CustomEmbedding && u.key.as_str().ends_with("bob.safetensors")));
    }

    #[test]
    fn list_uploads_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(&dir.path().join("missing"));
        assert!(r.list_uploads().is_empty());
    }

    #[test]
    fn listed_keys_match_resolved_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("carol.flac"), b"fLaC").unwrap();
        let r = resolver(dir.path());
        let listed = r.list_uploads();
        assert_eq!(listed[0].key, r.resolve("carol"));
    }
}
