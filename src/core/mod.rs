// ─── packsync Core ───
// Reconciliation pipeline for Starforge modpack instances.
//
// Architecture:
//   core/
//     version     — total order over version strings
//     side        — client/server inclusion rules
//     state       — persistent per-instance state document
//     manifest    — published target snapshot client
//     index       — package index + reverse filename index
//     releases    — upstream (GitHub) release API client
//     maven       — Maven metadata client + artifact URLs
//     tasks       — bounded worker-pool helper
//     downloader  — concurrent cached downloads with retries
//     merge       — three-way config merge (text, cfg, json)
//     launchlib   — launcher-library special-case updates
//     profile     — named TOML option bundles
//     updater     — status / init / update orchestration

pub mod diff;
pub mod downloader;
pub mod error;
pub mod http;
pub mod index;
pub mod launchlib;
pub mod manifest;
pub mod maven;
pub mod merge;
pub mod profile;
pub mod releases;
pub mod side;
pub mod state;
pub mod tasks;
pub mod updater;
pub mod version;
