// ─── Convoy Core ───
// Update-and-launch pipeline for the truck-simulator multiplayer mod.
//
// Architecture:
//   core/
//     checksum.rs  — Streaming md5/sha1/sha256 digests
//     version/     — Version document, comparison, VersionResolver
//     downloader/  — Mirror failover, resume, throttling, atomic publish
//     environment/ — Prefix + lock, translation layer, auxiliary components
//     launch/      — Launch plan, sessions, ProcessSupervisor
//     state/       — Persisted version records and prefix markers
//     config/      — Layered options (defaults < TOML file < CLI)
//     auth/        — Login-file account lookup
//     steam.rs     — Steam client, login file and library discovery

pub mod auth;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod downloader;
pub mod environment;
pub mod error;
pub mod http;
pub mod launch;
pub mod paths;
pub mod profile;
pub mod state;
pub mod steam;
pub mod version;
