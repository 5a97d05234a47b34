use std::fmt;
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::config::Config;
use crate::storage::{
  KeyValueStore,
  THEME_KEY
};

const COLORFGBG_ENV_VAR: &str =
  "COLORFGBG";

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum ThemeMode {
  Light,
  Dark,
  #[default]
  System
}

impl ThemeMode {
  pub fn storage_value(
    self
  ) -> &'static str {
    match self {
      | Self::Light => "light",
      | Self::Dark => "dark",
      | Self::System => "system"
    }
  }

  /// Effective dark flag for this mode
  /// given the current ambient value.
  pub fn resolve(
    self,
    ambient_dark: bool
  ) -> bool {
    match self {
      | Self::Light => false,
      | Self::Dark => true,
      | Self::System => ambient_dark
    }
  }
}

impl fmt::Display for ThemeMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.storage_value())
  }
}

impl FromStr for ThemeMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s.trim() {
      | "light" => Ok(Self::Light),
      | "dark" => Ok(Self::Dark),
      | "system" => Ok(Self::System),
      | other => Err(anyhow!(
        "invalid theme: {other} \
         (expected light, dark or \
         system)"
      ))
    }
  }
}

/// The host's light/dark signal.
pub trait AmbientSignal {
  fn prefers_dark(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedAmbient(pub bool);

impl AmbientSignal for FixedAmbient {
  fn prefers_dark(&self) -> bool {
    self.0
  }
}

/// Terminal background detection:
/// `ambient.dark` config key, else the
/// `COLORFGBG` convention, else light.
#[derive(Debug, Clone, Copy)]
pub struct TerminalAmbient {
  dark: bool
}

impl TerminalAmbient {
  #[instrument(skip(cfg))]
  pub fn detect(cfg: &Config) -> Self {
    if let Some(dark) =
      cfg.get_bool("ambient.dark")
    {
      debug!(
        dark,
        "ambient theme from config"
      );
      return Self { dark };
    }

    let dark = std::env::var(
      COLORFGBG_ENV_VAR
    )
    .ok()
    .and_then(|raw| {
      background_is_dark(&raw)
    })
    .unwrap_or(false);
    debug!(
      dark,
      "ambient theme from terminal"
    );
    Self { dark }
  }
}

impl AmbientSignal for TerminalAmbient {
  fn prefers_dark(&self) -> bool {
    self.dark
  }
}

/// `COLORFGBG` is `fg;bg` (sometimes
/// `fg;default;bg`); the last field is
/// the background palette index.
fn background_is_dark(
  raw: &str
) -> Option<bool> {
  let bg: u8 = raw
    .rsplit(';')
    .next()?
    .trim()
    .parse()
    .ok()?;
  Some(matches!(bg, 0..=6 | 8))
}

/// Requested display mode plus the
/// resolved dark flag.
#[derive(Debug)]
pub struct PreferenceStore<
  S: KeyValueStore
> {
  storage:        S,
  mode:           ThemeMode,
  effective_dark: bool
}

impl<S: KeyValueStore> PreferenceStore<S> {
  #[instrument(skip(storage, ambient))]
  pub fn load(
    storage: S,
    ambient: &dyn AmbientSignal
  ) -> Self {
    let mode = match storage
      .get(THEME_KEY)
    {
      | Ok(Some(raw))
        if !raw.trim().is_empty() =>
      {
        raw.parse::<ThemeMode>().unwrap_or_else(
          |error: anyhow::Error| {
            warn!(
              %error,
              "unrecognized stored \
               theme; using system"
            );
            ThemeMode::System
          }
        )
      }
      | Ok(_) => ThemeMode::System,
      | Err(error) => {
        warn!(
          error = %format!("{error:#}"),
          "failed reading stored \
           theme; using system"
        );
        ThemeMode::System
      }
    };

    let effective_dark = mode
      .resolve(ambient.prefers_dark());
    info!(
      %mode,
      effective_dark,
      "loaded theme preference"
    );

    Self {
      storage,
      mode,
      effective_dark
    }
  }

  pub fn mode(&self) -> ThemeMode {
    self.mode
  }

  pub fn is_dark(&self) -> bool {
    self.effective_dark
  }

  #[instrument(skip(self, ambient))]
  pub fn set_mode(
    &mut self,
    mode: ThemeMode,
    ambient: &dyn AmbientSignal
  ) -> anyhow::Result<()> {
    let effective_dark = mode
      .resolve(ambient.prefers_dark());
    self
      .storage
      .set(
        THEME_KEY,
        mode.storage_value()
      )
      .context(
        "failed to persist theme"
      )?;
    self.mode = mode;
    self.effective_dark = effective_dark;

    info!(
      %mode,
      effective_dark = self.effective_dark,
      "set theme preference"
    );
    Ok(())
  }

  /// Applies an ambient change. Only
  /// `System` follows it; returns
  /// whether the dark flag changed.
  #[instrument(skip(self))]
  pub fn on_ambient_change(
    &mut self,
    prefers_dark: bool
  ) -> bool {
    if self.mode != ThemeMode::System {
      debug!(
        mode = %self.mode,
        "ignoring ambient change"
      );
      return false;
    }

    let changed =
      self.effective_dark != prefers_dark;
    self.effective_dark = prefers_dark;
    if changed {
      info!(
        effective_dark = prefers_dark,
        "followed ambient theme"
      );
    }
    changed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStore;

  #[test]
  fn defaults_to_system_and_follows_ambient()
  {
    let mem = MemoryStore::new();
    let prefs = PreferenceStore::load(
      &mem,
      &FixedAmbient(true)
    );
    assert_eq!(
      prefs.mode(),
      ThemeMode::System
    );
    assert!(prefs.is_dark());
    assert_eq!(
      mem.get(THEME_KEY).unwrap(),
      None
    );
  }

  #[test]
  fn unrecognized_value_falls_back_to_system()
  {
    let mem = MemoryStore::new()
      .with_entry(THEME_KEY, "sepia");
    let prefs = PreferenceStore::load(
      &mem,
      &FixedAmbient(false)
    );
    assert_eq!(
      prefs.mode(),
      ThemeMode::System
    );
    assert!(!prefs.is_dark());
  }

  #[test]
  fn explicit_modes_ignore_ambient() {
    let mem = MemoryStore::new()
      .with_entry(THEME_KEY, "light");
    let mut prefs =
      PreferenceStore::load(
        &mem,
        &FixedAmbient(true)
      );
    assert!(!prefs.is_dark());
    assert!(!prefs.on_ambient_change(true));
    assert!(!prefs.is_dark());

    prefs
      .set_mode(
        ThemeMode::Dark,
        &FixedAmbient(false)
      )
      .unwrap();
    assert!(prefs.is_dark());
    assert!(
      !prefs.on_ambient_change(false)
    );
    assert!(prefs.is_dark());
    assert_eq!(
      mem
        .get(THEME_KEY)
        .unwrap()
        .as_deref(),
      Some("dark")
    );
  }

  #[test]
  fn system_mode_tracks_ambient_changes()
  {
    let mem = MemoryStore::new();
    let mut prefs =
      PreferenceStore::load(
        &mem,
        &FixedAmbient(false)
      );
    assert!(!prefs.is_dark());

    assert!(prefs.on_ambient_change(true));
    assert!(prefs.is_dark());
    assert!(
      !prefs.on_ambient_change(true)
    );
    assert!(
      prefs.on_ambient_change(false)
    );
    assert!(!prefs.is_dark());
  }

  #[test]
  fn switching_to_system_reads_ambient_at_call()
  {
    let mem = MemoryStore::new()
      .with_entry(THEME_KEY, "light");
    let mut prefs =
      PreferenceStore::load(
        &mem,
        &FixedAmbient(true)
      );
    prefs
      .set_mode(
        ThemeMode::System,
        &FixedAmbient(true)
      )
      .unwrap();
    assert!(prefs.is_dark());
    assert_eq!(
      mem
        .get(THEME_KEY)
        .unwrap()
        .as_deref(),
      Some("system")
    );

    let reloaded = PreferenceStore::load(
      &mem,
      &FixedAmbient(false)
    );
    assert_eq!(
      reloaded.mode(),
      ThemeMode::System
    );
    assert!(!reloaded.is_dark());
  }

  struct ReadOnlyStore;

  impl KeyValueStore for ReadOnlyStore {
    fn get(
      &self,
      _key: &str
    ) -> anyhow::Result<Option<String>> {
      Ok(None)
    }

    fn set(
      &self,
      key: &str,
      _value: &str
    ) -> anyhow::Result<()> {
      Err(anyhow!(
        "storage is read-only: {key}"
      ))
    }
  }

  #[test]
  fn failed_write_keeps_previous_mode() {
    let mut prefs = PreferenceStore::load(
      ReadOnlyStore,
      &FixedAmbient(false)
    );
    assert!(
      prefs
        .set_mode(
          ThemeMode::Dark,
          &FixedAmbient(false)
        )
        .is_err()
    );
    assert_eq!(
      prefs.mode(),
      ThemeMode::System
    );
    assert!(!prefs.is_dark());
  }

  #[test]
  fn colorfgbg_background_detection() {
    assert_eq!(
      background_is_dark("15;0"),
      Some(true)
    );
    assert_eq!(
      background_is_dark("0;default;15"),
      Some(false)
    );
    assert_eq!(
      background_is_dark("7;8"),
      Some(true)
    );
    assert_eq!(
      background_is_dark("garbage"),
      None
    );
  }
}
