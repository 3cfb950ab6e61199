//! Library side of the `stratus` binary: manifest loading, the subprocess
//! provider action and report rendering.

pub mod app;
pub mod manifest;
pub mod plugin;
pub mod render;

pub use app::{parse_last_update, App, OutputFormat};
pub use manifest::{Manifest, ManifestError, ProviderSpec};
pub use plugin::{AffectedResources, PluginAction, PluginCommand, PluginConfig, PluginMessage};
pub use render::RenderOptions;
