//! Prompt template registry.
//!
//! Templates are values, not code: one template per (language, mode),
//! loaded from a directory of `<lang>[_sdh].txt` files with built-in
//! fallbacks for anything not on disk. The registry is immutable after
//! load; the template version feeds the request fingerprint.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use subgen_models::{TargetTrack, TrackMode};

use crate::error::WorkerResult;

/// One immutable prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub text: String,
    /// Stable content version, part of the request fingerprint
    pub version: String,
}

impl PromptTemplate {
    fn from_text(text: String) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let version = format!("{:x}", digest)[..12].to_string();
        Self { text, version }
    }
}

/// Registry of prompt templates keyed by track.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    /// Build a registry from an optional template directory. Files are
    /// named `<lang>.txt` or `<lang>_sdh.txt`; unreadable files are
    /// skipped with a warning.
    pub async fn load(dir: Option<&Path>) -> WorkerResult<Self> {
        let mut templates = HashMap::new();

        if let Some(dir) = dir {
            if dir.is_dir() {
                let mut entries = tokio::fs::read_dir(dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                        continue;
                    }
                    match tokio::fs::read_to_string(&path).await {
                        Ok(text) if !text.trim().is_empty() => {
                            debug!("Loaded prompt template '{}'", stem);
                            templates
                                .insert(stem.to_string(), PromptTemplate::from_text(text));
                        }
                        Ok(_) => warn!("Prompt template {} is empty, skipping", path.display()),
                        Err(e) => {
                            warn!("Failed to read prompt template {}: {}", path.display(), e)
                        }
                    }
                }
            } else {
                warn!(
                    "Prompt template directory {} does not exist, using built-ins",
                    dir.display()
                );
            }
        }

        Ok(Self { templates })
    }

    /// Registry with only the built-in templates.
    pub fn builtin() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Template for a track, falling back to the built-in default.
    pub fn get(&self, track: &TargetTrack) -> PromptTemplate {
        if let Some(template) = self.templates.get(&track.key()) {
            return template.clone();
        }
        PromptTemplate::from_text(default_template(track))
    }
}

fn default_template(track: &TargetTrack) -> String {
    let base = format!(
        "You are an expert transcriber and subtitle creator. Watch the \
         provided video clip and produce subtitles in the language with \
         ISO 639 code '{lang}'.\n\n\
         Requirements:\n\
         - Output ONLY a numbered SRT cue list inside a ```srt code block.\n\
         - Timing lines use HH:MM:SS,mmm --> HH:MM:SS,mmm with times \
         relative to the start of this clip.\n\
         - Keep each cue under 10 seconds and under two lines of text.\n\
         - Do not invent dialogue; leave silent passages without cues.\n",
        lang = track.language
    );

    match track.mode {
        TrackMode::Standard => base,
        TrackMode::Sdh => format!(
            "{base}- Additionally transcribe non-speech audio relevant to \
             the scene: sound effects in brackets, music cues, and speaker \
             labels when the speaker is off-screen.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn eng() -> TargetTrack {
        TargetTrack::new("eng", TrackMode::Standard)
    }

    #[test]
    fn test_builtin_fallback_and_versioning() {
        let registry = PromptRegistry::builtin();
        let template = registry.get(&eng());
        assert!(template.text.contains("'eng'"));
        assert_eq!(template.version.len(), 12);

        // Same text, same version.
        assert_eq!(registry.get(&eng()).version, template.version);

        // SDH variant is a different template.
        let sdh = registry.get(&TargetTrack::new("eng", TrackMode::Sdh));
        assert_ne!(sdh.version, template.version);
        assert!(sdh.text.contains("non-speech"));
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("eng.txt"), "Custom English prompt").unwrap();
        std::fs::write(dir.path().join("ben_sdh.txt"), "Custom Bengali SDH prompt").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let registry = PromptRegistry::load(Some(dir.path())).await.unwrap();

        assert_eq!(registry.get(&eng()).text, "Custom English prompt");
        assert_eq!(
            registry
                .get(&TargetTrack::new("ben", TrackMode::Sdh))
                .text,
            "Custom Bengali SDH prompt"
        );
        // Missing track falls back to built-in.
        assert!(registry
            .get(&TargetTrack::new("hin", TrackMode::Standard))
            .text
            .contains("'hin'"));
    }

    #[tokio::test]
    async fn test_load_missing_directory_uses_builtins() {
        let registry = PromptRegistry::load(Some(Path::new("/nonexistent/prompts")))
            .await
            .unwrap();
        assert!(!registry.get(&eng()).text.is_empty());
    }
}
