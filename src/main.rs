use std::{fs, io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use bevy::prelude::*;
use portal_link::plugins::{game::GamePlugin, portal::PortalSettings};

const SETTINGS_PATH: &str = "portal_settings.json";

/// Read the portal settings file if there is one. A missing file means defaults.
fn load_settings(path: &Path) -> Result<PortalSettings> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PortalSettings::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()))
        }
    };
    PortalSettings::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

fn main() -> Result<()> {
    let settings = load_settings(Path::new(SETTINGS_PATH))?;

    App::new()
        .insert_resource(settings)
        .add_plugin(GamePlugin)
        .run();
    Ok(())
}
