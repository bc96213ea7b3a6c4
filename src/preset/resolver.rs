use serde::Serialize;
use tracing::{debug, info, warn};

use super::identity::{IdentityField, MediaIdentity};
use super::key::{PresetKey, PresetKind};
use super::store::{KvStore, PresetRecord, PresetStore};
use super::PresetError;
use crate::device::Controls;

/// Identity-derived levels, most specific first. TARGET and HOME follow.
const HIERARCHY: [PresetKind; 4] = [
    PresetKind::Track,
    PresetKind::Release,
    PresetKind::Artist,
    PresetKind::Genre,
];

/// Kinds a user can save for the current media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SaveKind {
    Track,
    Release,
    Artist,
    Genre,
}

impl SaveKind {
    pub fn kind(&self) -> PresetKind {
        match self {
            Self::Track => PresetKind::Track,
            Self::Release => PresetKind::Release,
            Self::Artist => PresetKind::Artist,
            Self::Genre => PresetKind::Genre,
        }
    }

    /// Narrower kinds that would keep shadowing a newly saved preset of this kind.
    fn shadowed(&self) -> &'static [PresetKind] {
        match self {
            Self::Artist => &[PresetKind::Track, PresetKind::Release],
            Self::Release => &[PresetKind::Track],
            Self::Track | Self::Genre => &[],
        }
    }
}

/// The preset that applies right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivePreset {
    pub kind: PresetKind,
    #[serde(serialize_with = "serialize_key")]
    pub key: PresetKey,
    pub record: PresetRecord,
}

/// One evaluated precedence level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub kind: PresetKind,
    #[serde(serialize_with = "serialize_opt_key")]
    pub key: Option<PresetKey>,
    pub record: Option<PresetRecord>,
}

impl ChainEntry {
    pub fn is_saved(&self) -> bool {
        self.key.is_some() && self.record.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub active: ActivePreset,
    /// TRACK, RELEASE, ARTIST, GENRE in order. Empty when nothing is playing.
    pub chain: Vec<ChainEntry>,
}

fn serialize_key<S: serde::Serializer>(key: &PresetKey, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&key.encode())
}

fn serialize_opt_key<S: serde::Serializer>(
    key: &Option<PresetKey>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match key {
        Some(key) => s.serialize_some(&key.encode()),
        None => s.serialize_none(),
    }
}

/// Preset operations exposed to the UI: resolution, saving, templates and
/// the selected target. Holds no state besides the store.
pub struct PresetLibrary<S> {
    store: PresetStore<S>,
}

impl<S: KvStore> PresetLibrary<S> {
    pub fn new(store: PresetStore<S>) -> Self {
        Self { store }
    }

    pub fn open(kv: S) -> Result<Self, PresetError> {
        Ok(Self::new(PresetStore::open(kv)?))
    }

    pub fn store(&self) -> &PresetStore<S> {
        &self.store
    }

    /// Current HOME record. Falls back to the defaults if it went missing.
    pub fn home(&self) -> PresetRecord {
        self.store.get(&PresetKey::Home).unwrap_or_else(|| {
            warn!("HOME preset missing, using defaults");
            PresetRecord::default_home()
        })
    }

    pub fn save_home(&mut self, controls: Controls) -> Result<(), PresetError> {
        self.store
            .set(&PresetKey::Home, &PresetRecord::new("Home", controls))?;
        info!("HOME preset set to {}", controls);
        Ok(())
    }

    /// Resolve against an explicit selected target.
    ///
    /// Walks TRACK > RELEASE > ARTIST > GENRE, then the target template, then
    /// HOME. Levels whose fields are missing or whose record is absent are
    /// skipped. Always yields exactly one active preset.
    pub fn resolve(
        &self,
        identity: Option<&MediaIdentity>,
        selected_target: Option<&str>,
    ) -> Resolution {
        let chain: Vec<ChainEntry> = match identity {
            Some(identity) => HIERARCHY
                .iter()
                .map(|&kind| {
                    let key = PresetKey::for_kind(kind, identity);
                    let record = key.as_ref().and_then(|k| self.store.get(k));
                    ChainEntry { kind, key, record }
                })
                .collect(),
            None => Vec::new(),
        };

        let matched = chain.iter().find_map(|entry| match (&entry.key, &entry.record) {
            (Some(key), Some(record)) => Some(ActivePreset {
                kind: entry.kind,
                key: key.clone(),
                record: record.clone(),
            }),
            _ => None,
        });

        let active = matched
            .or_else(|| self.target_preset(selected_target))
            .unwrap_or_else(|| ActivePreset {
                kind: PresetKind::Home,
                key: PresetKey::Home,
                record: self.home(),
            });

        debug!("Active preset: {} ({})", active.kind, active.record.title);
        Resolution { active, chain }
    }

    /// Resolve using the persisted selected target.
    pub fn resolve_active(&self, identity: Option<&MediaIdentity>) -> Resolution {
        let target = self.store.selected_target();
        self.resolve(identity, target.as_deref())
    }

    fn target_preset(&self, name: Option<&str>) -> Option<ActivePreset> {
        let key = PresetKey::template(name?);
        let record = self.store.get(&key)?;
        Some(ActivePreset {
            kind: PresetKind::Target,
            key,
            record,
        })
    }

    /// Save `controls` as the `kind` preset for `identity`, removing narrower
    /// presets that would otherwise keep taking precedence.
    pub fn save_preset(
        &mut self,
        kind: SaveKind,
        identity: &MediaIdentity,
        controls: Controls,
    ) -> Result<PresetKey, PresetError> {
        let preset_kind = kind.kind();
        let key = PresetKey::for_kind(preset_kind, identity).ok_or_else(|| {
            let field = identity
                .first_missing(preset_kind.required_fields())
                .unwrap_or(IdentityField::Title);
            PresetError::MissingField {
                kind: preset_kind,
                field,
            }
        })?;

        for &narrower in kind.shadowed() {
            if let Some(stale) = PresetKey::for_kind(narrower, identity) {
                self.store.remove(&stale)?;
            }
        }

        self.store
            .set(&key, &PresetRecord::new(key.label(), controls))?;
        info!("Saved {} preset {}", preset_kind, key.label());
        Ok(key)
    }

    /// Remove every identity-derived preset for `identity`. HOME and templates stay.
    pub fn clear_presets(&mut self, identity: &MediaIdentity) -> Result<(), PresetError> {
        for &kind in &HIERARCHY {
            if let Some(key) = PresetKey::for_kind(kind, identity) {
                self.store.remove(&key)?;
            }
        }
        info!("Cleared presets for {}", identity);
        Ok(())
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.store.list_template_names()
    }

    pub fn get_template(&self, name: &str) -> Option<Controls> {
        self.store
            .get(&PresetKey::template(name))
            .map(|record| record.controls)
    }

    pub fn save_template(&mut self, name: &str, controls: Controls) -> Result<(), PresetError> {
        if name.trim().is_empty() {
            return Err(PresetError::EmptyTemplateName);
        }
        self.store
            .set(&PresetKey::template(name), &PresetRecord::new(name, controls))?;
        info!("Saved template {:?}", name);
        Ok(())
    }

    /// Delete a template, clearing the selected target if it pointed here.
    pub fn delete_template(&mut self, name: &str) -> Result<(), PresetError> {
        self.store.remove(&PresetKey::template(name))?;
        if self.store.selected_target().as_deref() == Some(name) {
            info!("Deleted template {:?} was the selected target, clearing it", name);
            self.store.set_selected_target(None)?;
        }
        Ok(())
    }

    pub fn selected_target(&self) -> Option<String> {
        self.store.selected_target()
    }

    /// Select a template as the fallback, or `None` to fall back to HOME.
    pub fn set_selected_target(&mut self, name: Option<&str>) -> Result<(), PresetError> {
        if let Some(name) = name {
            if self.store.get(&PresetKey::template(name)).is_none() {
                return Err(PresetError::TemplateNotFound(name.to_string()));
            }
        }
        self.store.set_selected_target(name)?;
        info!("Selected target: {}", name.unwrap_or("Home"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::store::MemoryStore;

    fn library() -> PresetLibrary<MemoryStore> {
        PresetLibrary::open(MemoryStore::new()).unwrap()
    }

    fn controls(volume: f64, phase: f64) -> Controls {
        Controls { volume, phase }
    }

    fn abc() -> MediaIdentity {
        MediaIdentity::new()
            .with_title("A")
            .with_artist("B")
            .with_album("C")
    }

    #[test]
    fn test_first_run_resolves_to_default_home() {
        let lib = library();
        let res = lib.resolve(None, None);
        assert_eq!(res.active.kind, PresetKind::Home);
        assert_eq!(res.active.key, PresetKey::Home);
        assert_eq!(res.active.record.controls, controls(-29.0, 77.0));
        assert!(res.chain.is_empty());
    }

    #[test]
    fn test_home_reflects_current_stored_controls() {
        let mut lib = library();
        lib.save_home(controls(-35.0, 0.0)).unwrap();
        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Home);
        assert_eq!(res.active.record.controls, controls(-35.0, 0.0));
    }

    #[test]
    fn test_artist_preset_applies_to_track() {
        let mut lib = library();
        let artist_only = MediaIdentity::new().with_artist("B");
        lib.save_preset(SaveKind::Artist, &artist_only, controls(-20.0, 10.0))
            .unwrap();

        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Artist);
        assert_eq!(res.active.record.controls, controls(-20.0, 10.0));

        let saved: Vec<_> = res.chain.iter().map(|e| e.is_saved()).collect();
        assert_eq!(saved, vec![false, false, true, false]);
    }

    #[test]
    fn test_precedence_most_specific_wins() {
        let mut lib = library();
        let id = abc().with_genre("Jazz");
        lib.save_preset(SaveKind::Genre, &id, controls(-50.0, 0.0)).unwrap();
        assert_eq!(lib.resolve(Some(&id), None).active.kind, PresetKind::Genre);

        lib.save_preset(SaveKind::Track, &id, controls(-10.0, 0.0)).unwrap();
        assert_eq!(lib.resolve(Some(&id), None).active.kind, PresetKind::Track);

        // Genre survives and still applies to other tracks of that genre.
        let other = MediaIdentity::new().with_title("Z").with_genre("Jazz");
        assert_eq!(lib.resolve(Some(&other), None).active.kind, PresetKind::Genre);
    }

    #[test]
    fn test_release_save_removes_shadowing_track() {
        let mut lib = library();
        lib.save_preset(SaveKind::Track, &abc(), controls(-10.0, 0.0)).unwrap();
        lib.save_preset(SaveKind::Release, &abc(), controls(-15.0, 5.0)).unwrap();

        let track_key = PresetKey::for_kind(PresetKind::Track, &abc()).unwrap();
        assert_eq!(lib.store().get(&track_key), None);

        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Release);
        assert_eq!(res.active.record.controls, controls(-15.0, 5.0));
    }

    #[test]
    fn test_artist_save_removes_track_and_release() {
        let mut lib = library();
        lib.save_preset(SaveKind::Track, &abc(), controls(-10.0, 0.0)).unwrap();
        lib.save_preset(SaveKind::Release, &abc(), controls(-15.0, 0.0)).unwrap();
        lib.save_preset(SaveKind::Artist, &abc(), controls(-25.0, 0.0)).unwrap();

        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Artist);
        assert!(!res.chain[0].is_saved());
        assert!(!res.chain[1].is_saved());
    }

    #[test]
    fn test_track_save_keeps_broader_presets() {
        let mut lib = library();
        lib.save_preset(SaveKind::Artist, &abc(), controls(-25.0, 0.0)).unwrap();
        lib.save_preset(SaveKind::Track, &abc(), controls(-10.0, 0.0)).unwrap();

        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Track);
        assert!(res.chain[2].is_saved());
    }

    #[test]
    fn test_save_without_required_field_is_rejected() {
        let mut lib = library();
        let no_title = MediaIdentity::new().with_artist("B").with_album("C");
        let err = lib
            .save_preset(SaveKind::Track, &no_title, Controls::DEFAULT)
            .unwrap_err();
        assert!(matches!(
            err,
            PresetError::MissingField {
                kind: PresetKind::Track,
                field: IdentityField::Title
            }
        ));

        let err = lib
            .save_preset(SaveKind::Genre, &abc(), Controls::DEFAULT)
            .unwrap_err();
        assert!(matches!(err, PresetError::MissingField { kind: PresetKind::Genre, .. }));
    }

    #[test]
    fn test_saved_record_is_titled_by_key() {
        let mut lib = library();
        let key = lib
            .save_preset(SaveKind::Release, &abc(), Controls::DEFAULT)
            .unwrap();
        assert_eq!(lib.store().get(&key).unwrap().title, "Album: B / C");
    }

    #[test]
    fn test_target_fallback() {
        let mut lib = library();
        lib.save_template("Night Mode", controls(-45.0, 90.0)).unwrap();

        let res = lib.resolve(Some(&abc()), Some("Night Mode"));
        assert_eq!(res.active.kind, PresetKind::Target);
        assert_eq!(res.active.key, PresetKey::template("Night Mode"));
        assert_eq!(res.active.record.controls, controls(-45.0, 90.0));

        // A missing template falls through to HOME.
        let res = lib.resolve(Some(&abc()), Some("Gone"));
        assert_eq!(res.active.kind, PresetKind::Home);
    }

    #[test]
    fn test_identity_match_beats_target() {
        let mut lib = library();
        lib.save_template("Night Mode", controls(-45.0, 90.0)).unwrap();
        lib.save_preset(SaveKind::Artist, &abc(), controls(-5.0, 0.0)).unwrap();

        let res = lib.resolve(Some(&abc()), Some("Night Mode"));
        assert_eq!(res.active.kind, PresetKind::Artist);
    }

    #[test]
    fn test_resolve_active_uses_persisted_target() {
        let mut lib = library();
        lib.save_template("Night Mode", controls(-45.0, 90.0)).unwrap();
        lib.set_selected_target(Some("Night Mode")).unwrap();

        assert_eq!(lib.resolve_active(None).active.kind, PresetKind::Target);
        assert_eq!(lib.resolve_active(Some(&abc())).active.kind, PresetKind::Target);

        lib.set_selected_target(None).unwrap();
        assert_eq!(lib.resolve_active(Some(&abc())).active.kind, PresetKind::Home);
    }

    #[test]
    fn test_deleting_selected_template_clears_target() {
        let mut lib = library();
        lib.save_template("Night Mode", controls(-45.0, 90.0)).unwrap();
        lib.save_template("Movie", controls(-20.0, 0.0)).unwrap();
        lib.set_selected_target(Some("Night Mode")).unwrap();

        lib.delete_template("Movie").unwrap();
        assert_eq!(lib.selected_target().as_deref(), Some("Night Mode"));

        lib.delete_template("Night Mode").unwrap();
        assert_eq!(lib.selected_target(), None);
        assert_eq!(lib.resolve_active(Some(&abc())).active.kind, PresetKind::Home);
        assert!(lib.list_templates().is_empty());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut lib = library();
        assert!(matches!(
            lib.set_selected_target(Some("Nope")),
            Err(PresetError::TemplateNotFound(_))
        ));
        assert_eq!(lib.selected_target(), None);
    }

    #[test]
    fn test_templates() {
        let mut lib = library();
        assert!(matches!(
            lib.save_template("  ", Controls::DEFAULT),
            Err(PresetError::EmptyTemplateName)
        ));

        lib.save_template("B", controls(-1.0, 1.0)).unwrap();
        lib.save_template("A", controls(-2.0, 2.0)).unwrap();
        lib.save_template("A", controls(-3.0, 3.0)).unwrap();

        assert_eq!(lib.list_templates(), vec!["A", "B"]);
        assert_eq!(lib.get_template("A"), Some(controls(-3.0, 3.0)));
        assert_eq!(lib.get_template("C"), None);
    }

    #[test]
    fn test_clear_presets() {
        let mut lib = library();
        let id = abc().with_genre("Jazz");
        lib.save_template("Night Mode", controls(-45.0, 90.0)).unwrap();
        lib.save_preset(SaveKind::Genre, &id, Controls::DEFAULT).unwrap();
        lib.save_preset(SaveKind::Artist, &id, Controls::DEFAULT).unwrap();
        lib.save_preset(SaveKind::Track, &id, Controls::DEFAULT).unwrap();

        lib.clear_presets(&id).unwrap();

        let res = lib.resolve(Some(&id), None);
        assert!(res.chain.iter().all(|e| !e.is_saved()));
        assert_eq!(res.active.kind, PresetKind::Home);
        assert_eq!(lib.list_templates(), vec!["Night Mode"]);
        assert!(lib.store().get(&PresetKey::Home).is_some());
    }

    #[test]
    fn test_corrupt_level_falls_through() {
        let mut lib = library();
        lib.save_preset(SaveKind::Artist, &abc(), controls(-20.0, 0.0)).unwrap();
        let track = PresetKey::for_kind(PresetKind::Track, &abc()).unwrap();
        lib.store
            .substrate_mut()
            .set(&track.encode(), "not json".into())
            .unwrap();

        let res = lib.resolve(Some(&abc()), None);
        assert_eq!(res.active.kind, PresetKind::Artist);
    }

    #[test]
    fn test_resolution_serializes_keys_as_strings() {
        let lib = library();
        let res = lib.resolve(Some(&MediaIdentity::new().with_artist("B")), None);
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["active"]["kind"], "HOME");
        assert_eq!(json["active"]["key"], "PRESET:MUSIC<HOME>");
        assert_eq!(json["chain"][2]["key"], "PRESET:MUSIC<ARTIST><B>");
        assert!(json["chain"][0]["key"].is_null());
    }
}
