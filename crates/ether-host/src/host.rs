//! Fixed-timestep world host.
//!
//! The [`WorldHost`] owns one [`SimWorld`] and its [`Registry`] and drives
//! them forward. Each tick:
//!
//! 1. Every loaded actor's effects run: ended effects are torn down, live
//!    portals and wards publish their state to the registry.
//! 2. The registry ticks, re-filing entries whose owners moved.
//! 3. The tick counter advances, and if the registry is dirty and a save is
//!    due, the registry document is written to disk.
//!
//! Saves go through a temporary file and a rename, so a crash mid-save
//! leaves the previous document intact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use ether_core::prelude::*;

use crate::linking;
use crate::ward;
use crate::world::{EffectKind, SimWorld};

// ---------------------------------------------------------------------------
// HostConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`WorldHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Ticks between autosaves. Zero disables autosave.
    pub save_interval_ticks: u64,
    /// Where the registry document is saved. `None` disables autosave.
    pub save_path: Option<PathBuf>,
}

impl Default for HostConfig {
    /// 20 ticks per second, autosave every 100 ticks, no save path.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 20.0,
            save_interval_ticks: 100,
            save_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// HostDiagnostics
// ---------------------------------------------------------------------------

/// Timing and counters for the last tick.
#[derive(Debug, Clone, Default)]
pub struct HostDiagnostics {
    /// Wall-clock time of the whole tick, autosave included.
    pub total_time: Duration,
    /// Time spent in [`Registry::tick`].
    pub registry_time: Duration,
    /// Entries visited by the registry tick.
    pub entries_ticked: usize,
    /// Effects torn down because they ended.
    pub effects_ended: usize,
    /// Whether this tick wrote a save.
    pub saved: bool,
}

// ---------------------------------------------------------------------------
// WorldHost
// ---------------------------------------------------------------------------

/// Drives a world and its effect registry.
pub struct WorldHost {
    world: SimWorld,
    registry: Registry,
    config: HostConfig,
    tick_counter: u64,
    last_save_tick: u64,
    last_diagnostics: HostDiagnostics,
}

impl WorldHost {
    /// Create a host around `world` with an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite.
    pub fn new(world: SimWorld, registry: Registry, config: HostConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        Self {
            world,
            registry,
            config,
            tick_counter: 0,
            last_save_tick: 0,
            last_diagnostics: HostDiagnostics::default(),
        }
    }

    /// Execute one tick.
    pub fn tick(&mut self) -> &HostDiagnostics {
        let tick_start = Instant::now();
        let effects_ended = self.run_effects();

        let registry_start = Instant::now();
        let entries_ticked = self.registry.tick(&self.world);
        let registry_time = registry_start.elapsed();

        self.tick_counter += 1;
        let saved = self.autosave();

        self.last_diagnostics = HostDiagnostics {
            total_time: tick_start.elapsed(),
            registry_time,
            entries_ticked,
            effects_ended,
            saved,
        };
        &self.last_diagnostics
    }

    /// Run `count` ticks.
    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.tick();
        }
    }

    fn run_effects(&self) -> usize {
        let mut ended = 0;
        for actor in self.world.actors() {
            let caster: Arc<dyn Actor> = actor.clone();
            for effect in actor.clear_dead_effects() {
                if effect.portal_state().is_some() {
                    linking::destroy(&self.registry, &self.world, caster.uuid(), &effect);
                } else {
                    self.registry.remove_effect(&self.world, &*effect, caster.uuid());
                }
                ended += 1;
            }

            let mut guard = self.registry.lock(&self.world);
            for effect in actor.effects() {
                match effect.kind() {
                    EffectKind::Portal(_) => {
                        linking::maintain(&mut guard, &caster, &effect);
                    }
                    EffectKind::Ward { .. } => {
                        ward::maintain(&mut guard, &caster, &effect);
                    }
                }
            }
        }
        ended
    }

    fn autosave(&mut self) -> bool {
        let interval = self.config.save_interval_ticks;
        if interval == 0 || self.tick_counter - self.last_save_tick < interval {
            return false;
        }
        let Some(path) = self.config.save_path.clone() else {
            return false;
        };
        if !self.registry.is_dirty() {
            self.last_save_tick = self.tick_counter;
            return false;
        }
        match self.save_to(&path) {
            Ok(()) => true,
            Err(e) => {
                // Stay dirty so the next interval retries.
                tracing::warn!(error = %format!("{e:#}"), path = %path.display(), "autosave failed");
                false
            }
        }
    }

    // -- persistence --------------------------------------------------------

    /// Prune and write the registry document to `path`, then clear the
    /// dirty flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    pub fn save_to(&mut self, path: &Path) -> anyhow::Result<()> {
        let document = self.registry.serialize(&self.world);
        let bytes = serde_json::to_vec_pretty(&document).context("failed to encode registry document")?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;

        self.registry.mark_saved();
        self.last_save_tick = self.tick_counter;
        tracing::info!(
            path = %path.display(),
            entries = document.entry_count(),
            tick = self.tick_counter,
            "registry saved"
        );
        Ok(())
    }

    /// Save to the configured path.
    ///
    /// # Errors
    ///
    /// Returns an error if no save path is configured or the save fails.
    pub fn save(&mut self) -> anyhow::Result<()> {
        let path = self.config.save_path.clone().context("no save path configured")?;
        self.save_to(&path)
    }

    /// Replace the registry with the document stored at `path`.
    ///
    /// Entries that cannot be read are skipped and listed in the returned
    /// report. A missing file is an error; use [`load_or_default`] for first
    /// start-up.
    ///
    /// [`load_or_default`]: Self::load_or_default
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a registry
    /// document at all.
    pub fn load_from(&mut self, path: &Path) -> anyhow::Result<LoadReport> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let (registry, report) = Registry::deserialize(self.registry.config().clone(), &value)
            .with_context(|| format!("failed to load registry from {}", path.display()))?;

        self.registry = registry;
        tracing::info!(
            path = %path.display(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "registry loaded"
        );
        Ok(report)
    }

    /// Load from the configured path if a save exists there. Returns `None`
    /// when there was nothing to load.
    ///
    /// # Errors
    ///
    /// Returns an error if a save exists but cannot be loaded.
    pub fn load_or_default(&mut self) -> anyhow::Result<Option<LoadReport>> {
        match self.config.save_path.clone() {
            Some(path) if path.exists() => self.load_from(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// BLAKE3 hex digest of the registry document as it would be saved now.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded.
    pub fn state_hash(&self) -> anyhow::Result<String> {
        let document = self.registry.serialize(&self.world);
        let bytes = serde_json::to_vec(&document).context("failed to encode registry document")?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulation time in seconds, computed from the tick count.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.config.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.config.fixed_dt
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn last_diagnostics(&self) -> &HostDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
