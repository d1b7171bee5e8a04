use std::fmt::Write as _;
use std::str::FromStr;

use carte_shared::{Geometry, Position, PropertyMap};
use serde_json::Value;
use thiserror::Error;

use crate::record::NAME_KEY;
use crate::view::MapView;

pub const HELP: &str = "\
commands:
  layers                   list layers with visibility and feature counts
  show|hide|toggle <id>    change a layer's visibility
  reload [id]              reload one layer, or all of them
  click <lon> <lat>        select the feature under a point
  bind <id>                bind the editable layer
  draw | modify            toggle drawing / modifying mode
  add <lon> <lat> [name]   draw a point in the bound layer
  move <lon> <lat>         move the selected feature
  delete                   delete the selected feature
  home                     fly back to the home view
  basemap <key>            osm, googleT, googleS or googleM
  status                   edit mode, selection and camera
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Layers,
    Show(String),
    Hide(String),
    Toggle(String),
    Reload(Option<String>),
    Click { lon: f64, lat: f64 },
    Bind(String),
    Draw,
    Modify,
    Add { lon: f64, lat: f64, name: Option<String> },
    Move { lon: f64, lat: f64 },
    Delete,
    Home,
    BaseMap(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("`{command}` expects {expected}")]
    Usage {
        command: &'static str,
        expected: &'static str,
    },
    #[error("{0:?} is not a number")]
    Number(String),
}

fn coordinate(word: Option<&str>, command: &'static str) -> Result<f64, CommandError> {
    let word = word.ok_or(CommandError::Usage {
        command,
        expected: "<lon> <lat>",
    })?;
    word.parse()
        .map_err(|_| CommandError::Number(word.to_string()))
}

fn layer_id(word: Option<&str>, command: &'static str) -> Result<String, CommandError> {
    word.map(str::to_string).ok_or(CommandError::Usage {
        command,
        expected: "a layer id",
    })
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;
        let command = match verb {
            "layers" => Self::Layers,
            "show" => Self::Show(layer_id(words.next(), "show")?),
            "hide" => Self::Hide(layer_id(words.next(), "hide")?),
            "toggle" => Self::Toggle(layer_id(words.next(), "toggle")?),
            "reload" => Self::Reload(words.next().map(str::to_string)),
            "click" => Self::Click {
                lon: coordinate(words.next(), "click")?,
                lat: coordinate(words.next(), "click")?,
            },
            "bind" => Self::Bind(layer_id(words.next(), "bind")?),
            "draw" => Self::Draw,
            "modify" => Self::Modify,
            "add" => {
                let lon = coordinate(words.next(), "add")?;
                let lat = coordinate(words.next(), "add")?;
                let name = words.collect::<Vec<_>>().join(" ");
                Self::Add {
                    lon,
                    lat,
                    name: (!name.is_empty()).then_some(name),
                }
            }
            "move" => Self::Move {
                lon: coordinate(words.next(), "move")?,
                lat: coordinate(words.next(), "move")?,
            },
            "delete" => Self::Delete,
            "home" => Self::Home,
            "basemap" => Self::BaseMap(words.next().map(str::to_string).ok_or(
                CommandError::Usage {
                    command: "basemap",
                    expected: "a base map key",
                },
            )?),
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Run one command against the view and describe the result. Edit refusals
/// have already gone through the view's notifier by the time this returns.
pub fn execute(view: &mut MapView, command: Command) -> String {
    match command {
        Command::Layers => describe_layers(view),
        Command::Show(id) => outcome(view.set_layer_visible(&id, true).map(|()| format!("{id} shown"))),
        Command::Hide(id) => outcome(view.set_layer_visible(&id, false).map(|()| format!("{id} hidden"))),
        Command::Toggle(id) => outcome(view.toggle_layer(&id).map(|visible| {
            format!("{id} {}", if visible { "shown" } else { "hidden" })
        })),
        Command::Reload(Some(id)) => outcome(view.reload_layer(&id).map(|_| format!("reloading {id}"))),
        Command::Reload(None) => {
            view.reload_all();
            "reloading every layer".into()
        }
        Command::Click { lon, lat } => match view.click_lonlat(lon, lat) {
            Some(selection) => {
                let props = Value::Object(selection.properties.clone());
                format!("selected {} in {}: {props}", selection.key, selection.layer_id)
            }
            None => "nothing there".into(),
        },
        Command::Bind(id) => outcome(view.bind_editable(&id).map(|()| format!("{id} bound"))),
        Command::Draw => outcome(view.toggle_drawing().map(|mode| format!("mode: {mode}"))),
        Command::Modify => outcome(view.toggle_modifying().map(|mode| format!("mode: {mode}"))),
        Command::Add { lon, lat, name } => {
            let mut properties = PropertyMap::new();
            if let Some(name) = name {
                properties.insert(NAME_KEY.into(), Value::String(name));
            }
            let geometry = Geometry::Point(Position::new(lon, lat));
            outcome(view.draw(geometry, properties).map(|key| format!("{key} drawn, saving")))
        }
        Command::Move { lon, lat } => {
            outcome(view.move_selected(lon, lat).map(|sent| format!("moved, {sent} update(s) sent")))
        }
        Command::Delete => outcome(view.delete_selected().map(|id| format!("deleting {id}"))),
        Command::Home => {
            view.home();
            "flying home".into()
        }
        Command::BaseMap(key) => format!("base map: {}", view.set_basemap(&key)),
        Command::Status => describe_status(view),
        Command::Help | Command::Quit => HELP.into(),
    }
}

fn outcome<E: std::fmt::Display>(result: Result<String, E>) -> String {
    result.unwrap_or_else(|e| format!("error: {e}"))
}

fn describe_layers(view: &MapView) -> String {
    let mut out = String::new();
    for def in view.registry().iter() {
        let _ = writeln!(
            out,
            "{:<12} {:<8} {:>5} features  {}",
            def.id,
            if view.layers().is_visible(&def.id) { "visible" } else { "hidden" },
            view.layers().feature_count(&def.id),
            def.source,
        );
    }
    out.trim_end().to_string()
}

fn describe_status(view: &MapView) -> String {
    let selection = view
        .selection()
        .current()
        .map(|s| format!("{} ({})", s.key, s.id.as_ref().map_or("unsaved".into(), ToString::to_string)))
        .unwrap_or_else(|| "none".into());
    let camera = view.viewport();
    format!(
        "mode: {}  bound: {}  selection: {}  zoom: {:.2}  basemap: {}  busy: {}",
        view.edit_mode(),
        view.edit_session().bound_layer().unwrap_or("-"),
        selection,
        camera.zoom,
        camera.basemap(),
        view.is_busy(),
    )
}
