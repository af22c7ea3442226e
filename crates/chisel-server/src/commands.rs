use chisel_hooks::{ChatCommand, Factory, HookError, HookRegistry};
use chisel_types::Location;
use std::collections::HashMap;
use std::sync::Arc;

/// Parse hey0-style location records: one `name:x:y:z:yaw:pitch` per
/// line. Unparseable lines are skipped.
fn get_locations(data: &str) -> HashMap<String, Location> {
    let mut locations = HashMap::new();
    for line in data.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 6 {
            continue;
        }
        let parsed = (
            fields[1].parse::<f64>(),
            fields[2].parse::<f64>(),
            fields[3].parse::<f64>(),
            fields[4].parse::<f32>(),
            fields[5].parse::<f32>(),
        );
        if let (Ok(x), Ok(y), Ok(z), Ok(yaw), Ok(pitch)) = parsed {
            locations.insert(
                fields[0].to_string(),
                Location {
                    x,
                    y,
                    z,
                    stance: y + 1.62,
                    yaw,
                    pitch,
                    grounded: false,
                },
            );
        }
    }
    locations
}

fn put_locations(locations: &HashMap<String, Location>) -> String {
    let mut out = String::new();
    for (name, l) in locations {
        out.push_str(&format!(
            "{}:{}:{}:{}:{}:{}\n",
            name, l.x, l.y, l.z, l.yaw, l.pitch
        ));
    }
    out
}

fn load_locations(factory: &dyn Factory, key: &str) -> Result<HashMap<String, Location>, HookError> {
    let data = factory
        .world()
        .load_plugin_data(key)
        .map_err(|e| HookError::failed(e.to_string()))?;
    Ok(get_locations(&String::from_utf8_lossy(&data)))
}

fn save_locations(
    factory: &dyn Factory,
    key: &str,
    locations: &HashMap<String, Location>,
) -> Result<(), HookError> {
    factory
        .world()
        .save_plugin_data(key, put_locations(locations).as_bytes())
        .map_err(|e| HookError::failed(e.to_string()))
}

pub struct Help;

impl ChatCommand for Help {
    fn name(&self) -> &'static str {
        "help"
    }
    fn info(&self) -> &'static str {
        "Lists available commands"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        _username: &str,
        _params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let mut commands = factory.commands();
        commands.sort();
        let mut lines = vec!["Available commands:".to_string()];
        for (name, usage, info) in commands {
            lines.push(format!("/{} {} - {}", name, usage, info));
        }
        Ok(lines)
    }
}

pub struct List;

impl ChatCommand for List {
    fn name(&self) -> &'static str {
        "list"
    }
    fn info(&self) -> &'static str {
        "Lists connected players"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        _username: &str,
        _params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let mut names = factory.usernames();
        names.sort();
        Ok(vec![format!("Connected players: {}", names.join(", "))])
    }
}

pub struct Home;

impl ChatCommand for Home {
    fn name(&self) -> &'static str {
        "home"
    }
    fn info(&self) -> &'static str {
        "Warps player home"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        username: &str,
        _params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let homes = load_locations(factory, "homes")?;
        let mut lines = Vec::new();
        let destination = match homes.get(username) {
            Some(home) => {
                lines.push(format!("Teleporting {} home", username));
                *home
            }
            None => {
                lines.push(format!("Teleporting {} to spawn", username));
                let spawn = factory.world().spawn;
                Location::at(spawn.x as f64 + 0.5, spawn.y as f64, spawn.z as f64 + 0.5)
            }
        };
        if !factory.teleport(username, destination) {
            return Err(HookError::failed(format!("{} is not connected", username)));
        }
        lines.push("Teleportation successful!".to_string());
        Ok(lines)
    }
}

pub struct SetHome;

impl ChatCommand for SetHome {
    fn name(&self) -> &'static str {
        "sethome"
    }
    fn info(&self) -> &'static str {
        "Set home"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        username: &str,
        _params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let location = factory
            .player_location(username)
            .ok_or_else(|| HookError::failed(format!("{} is not connected", username)))?;
        let mut homes = load_locations(factory, "homes")?;
        homes.insert(username.to_string(), location);
        save_locations(factory, "homes", &homes)?;
        Ok(vec![format!("Saved {}!", username)])
    }
}

pub struct Warp;

impl ChatCommand for Warp {
    fn name(&self) -> &'static str {
        "warp"
    }
    fn usage(&self) -> &'static str {
        "<location>"
    }
    fn info(&self) -> &'static str {
        "Warps player to a warp location"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        username: &str,
        params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let Some(name) = params.first() else {
            return Err(HookError::failed("usage: /warp <location>"));
        };
        let warps = load_locations(factory, "warps")?;
        match warps.get(*name) {
            Some(warp) => {
                if !factory.teleport(username, *warp) {
                    return Err(HookError::failed(format!("{} is not connected", username)));
                }
                Ok(vec![
                    format!("Teleporting you to {}", name),
                    "Teleportation successful!".to_string(),
                ])
            }
            None => Ok(vec![format!("No warp location {} available", name)]),
        }
    }
}

pub struct SetWarp;

impl ChatCommand for SetWarp {
    fn name(&self) -> &'static str {
        "setwarp"
    }
    fn usage(&self) -> &'static str {
        "<name>"
    }
    fn info(&self) -> &'static str {
        "Set warp location"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        username: &str,
        params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let Some(name) = params.first() else {
            return Err(HookError::failed("usage: /setwarp <name>"));
        };
        let location = factory
            .player_location(username)
            .ok_or_else(|| HookError::failed(format!("{} is not connected", username)))?;
        let mut warps = load_locations(factory, "warps")?;
        warps.insert(name.to_string(), location);
        save_locations(factory, "warps", &warps)?;
        Ok(vec![format!("Saved warp {}!", name)])
    }
}

pub struct RemoveWarp;

impl ChatCommand for RemoveWarp {
    fn name(&self) -> &'static str {
        "removewarp"
    }
    fn usage(&self) -> &'static str {
        "<name>"
    }
    fn info(&self) -> &'static str {
        "Removes a warp location"
    }
    fn run(
        &self,
        factory: &dyn Factory,
        _username: &str,
        params: &[&str],
    ) -> Result<Vec<String>, HookError> {
        let Some(name) = params.first() else {
            return Err(HookError::failed("usage: /removewarp <name>"));
        };
        let mut warps = load_locations(factory, "warps")?;
        match warps.remove(*name) {
            Some(_) => {
                save_locations(factory, "warps", &warps)?;
                Ok(vec![format!("Removed warp {}", name)])
            }
            None => Ok(vec![format!("No warp location {} available", name)]),
        }
    }
}

pub fn register_defaults(registry: &mut HookRegistry) {
    registry.register_command(Arc::new(Help));
    registry.register_command(Arc::new(List));
    registry.register_command(Arc::new(Home));
    registry.register_command(Arc::new(SetHome));
    registry.register_command(Arc::new(Warp));
    registry.register_command(Arc::new(SetWarp));
    registry.register_command(Arc::new(RemoveWarp));
}
