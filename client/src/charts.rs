use carte_shared::PropertyMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::selection::SelectionEvent;

/// Men / women split of a selected commune.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationBreakdown {
    pub commune: String,
    pub men: f64,
    pub women: f64,
}

impl PopulationBreakdown {
    pub fn from_properties(properties: &PropertyMap) -> Self {
        let commune = first_text(properties, &["CCRCA", "CCRCA_1"])
            .map(capitalize)
            .unwrap_or_default();
        Self {
            commune,
            men: first_number(properties, &["Hommes", "hommes"]),
            women: first_number(properties, &["Femmes", "femmes"]),
        }
    }

    pub fn total(&self) -> f64 {
        self.men + self.women
    }

    /// Percentages of (men, women); zero when there is nobody to count.
    pub fn shares(&self) -> (f64, f64) {
        let total = self.total();
        if total <= 0.0 {
            return (0.0, 0.0);
        }
        (self.men / total * 100.0, self.women / total * 100.0)
    }
}

/// Name of a selected region, from `nom` or `NOM`.
pub fn selected_region_name(properties: &PropertyMap) -> Option<String> {
    first_text(properties, &["nom", "NOM"]).map(str::to_string)
}

fn first_text<'a>(properties: &'a PropertyMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| properties.get(*key).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
}

fn first_number(properties: &PropertyMap, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|key| properties.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
}

/// "DAKAR PLATEAU" -> "Dakar plateau"
fn capitalize(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// What the chart side panel currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartPanel {
    pub population: Option<PopulationBreakdown>,
    pub region: Option<String>,
}

impl ChartPanel {
    pub fn apply(&mut self, event: &SelectionEvent) {
        match event {
            SelectionEvent::Selected(properties) => {
                self.population = Some(PopulationBreakdown::from_properties(properties));
                self.region = selected_region_name(properties);
            }
            SelectionEvent::Cleared => {
                self.population = None;
                self.region = None;
            }
        }
    }
}

/// Log chart updates for every selection change until the view goes away.
pub fn spawn_chart_observer(mut events: broadcast::Receiver<SelectionEvent>) -> JoinHandle<ChartPanel> {
    tokio::spawn(async move {
        let mut panel = ChartPanel::default();
        loop {
            match events.recv().await {
                Ok(event) => {
                    panel.apply(&event);
                    match &panel.population {
                        Some(p) if p.total() > 0.0 => {
                            let (men, women) = p.shares();
                            info!(
                                commune = %p.commune,
                                men = p.men,
                                women = p.women,
                                men_pct = (men * 10.0).round() / 10.0,
                                women_pct = (women * 10.0).round() / 10.0,
                                "population"
                            );
                        }
                        Some(_) => debug!(region = ?panel.region, "selection has no population data"),
                        None => debug!("chart panel cleared"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chart observer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        panel
    })
}
