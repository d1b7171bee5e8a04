use std::collections::HashSet;
use std::path::Path;

use carte_shared::{
    FitPolicy, GeometryKind, LayerDefinition, LayerStyle, Rgba, SourceDescriptor,
};
use tracing::info;

use crate::config;
use crate::error::RegistryError;

/// Read-only, ordered list of layer definitions. Order is draw order:
/// later layers sit on top.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    definitions: Vec<LayerDefinition>,
}

impl LayerRegistry {
    pub fn new(definitions: Vec<LayerDefinition>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for def in &definitions {
            if def.id.trim().is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if !seen.insert(def.id.as_str()) {
                return Err(RegistryError::DuplicateId(def.id.clone()));
            }
            if let Some(fit) = &def.fit
                && (!fit.max_zoom.is_finite()
                    || !fit.duration_ms.is_finite()
                    || fit.duration_ms < 0.0
                    || fit.padding.iter().any(|p| !p.is_finite() || *p < 0.0))
            {
                return Err(RegistryError::InvalidFit { id: def.id.clone() });
            }
        }
        Ok(Self { definitions })
    }

    /// The layers the map ships with.
    pub fn builtin() -> Self {
        Self {
            definitions: builtin_definitions(),
        }
    }

    /// Definitions from a JSON array of layer definitions.
    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let file_error = |reason: String| RegistryError::File {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let definitions: Vec<LayerDefinition> =
            serde_json::from_str(&raw).map_err(|e| file_error(e.to_string()))?;
        Self::new(definitions)
    }

    /// `CARTE_LAYERS_FILE` when set, otherwise the built-in layers.
    pub fn from_env() -> Result<Self, RegistryError> {
        match config::layers_file() {
            Some(path) => {
                let registry = Self::from_json_file(&path)?;
                info!(path = %path.display(), layers = registry.len(), "layer definitions loaded");
                Ok(registry)
            }
            None => Ok(Self::builtin()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&LayerDefinition> {
        self.definitions.iter().find(|def| def.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.definitions.iter().position(|def| def.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerDefinition> {
        self.definitions.iter()
    }

    pub fn editable(&self) -> impl Iterator<Item = &LayerDefinition> {
        self.definitions.iter().filter(|def| def.editable)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

pub fn builtin_definitions() -> Vec<LayerDefinition> {
    let transparent = Some(Rgba::rgba(0, 0, 0, 0.0));
    vec![
        LayerDefinition {
            id: "Regions".into(),
            name: "Régions".into(),
            kind: GeometryKind::Polygon,
            source: SourceDescriptor::Static("/donnees_shp/regions.geojson".into()),
            style: LayerStyle {
                stroke: Some(Rgba::rgb(0x1E, 0x0F, 0x1C)),
                stroke_width: 3.0,
                fill: transparent,
                point_radius: None,
            },
            visible: true,
            fit: Some(FitPolicy::new(10.0, 500.0)),
            optional: false,
            editable: false,
        },
        LayerDefinition {
            id: "Communes".into(),
            name: "Communes".into(),
            kind: GeometryKind::Polygon,
            source: SourceDescriptor::Static("/donnees_shp/communes.geojson".into()),
            style: LayerStyle {
                stroke: Some(Rgba::rgb(0xA7, 0x00, 0x1E)),
                stroke_width: 1.0,
                fill: transparent,
                point_radius: None,
            },
            visible: true,
            fit: None,
            optional: false,
            editable: false,
        },
        LayerDefinition {
            id: "hopitaux".into(),
            name: "Hôpitaux".into(),
            kind: GeometryKind::Point,
            source: SourceDescriptor::Dynamic("hopitaux".into()),
            style: LayerStyle {
                stroke: Some(Rgba::rgb(0, 0, 0)),
                stroke_width: 1.0,
                fill: Some(Rgba::rgb(0x00, 0xFF, 0x00)),
                point_radius: Some(6.0),
            },
            visible: true,
            fit: Some(FitPolicy::new(14.0, 700.0)),
            optional: false,
            editable: true,
        },
        LayerDefinition {
            id: "ecoles".into(),
            name: "Écoles".into(),
            kind: GeometryKind::Polygon,
            source: SourceDescriptor::Dynamic("ecoles".into()),
            style: LayerStyle {
                stroke: Some(Rgba::rgb(0x1D, 0x4E, 0xD8)),
                stroke_width: 2.0,
                fill: Some(Rgba::rgba(29, 78, 216, 0.15)),
                point_radius: None,
            },
            visible: false,
            fit: None,
            optional: true,
            editable: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn definition(id: &str) -> LayerDefinition {
        LayerDefinition {
            id: id.into(),
            name: id.into(),
            kind: GeometryKind::Point,
            source: SourceDescriptor::Dynamic(id.into()),
            style: LayerStyle::default(),
            visible: true,
            fit: None,
            optional: false,
            editable: false,
        }
    }

    #[test]
    fn builtin_registry_is_valid() {
        let builtin = LayerRegistry::builtin();
        let validated = LayerRegistry::new(builtin_definitions()).expect("builtin definitions");
        assert_eq!(builtin.len(), validated.len());
        assert_eq!(builtin.position("hopitaux"), Some(2));
        assert_eq!(
            builtin.editable().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["hopitaux"]
        );
        assert!(builtin.get("ecoles").is_some_and(|d| d.optional && !d.visible));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = LayerRegistry::new(vec![definition("a"), definition("b"), definition("a")])
            .expect_err("duplicate id");
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert!(matches!(
            LayerRegistry::new(vec![definition(" ")]),
            Err(RegistryError::EmptyId)
        ));
    }

    #[test]
    fn negative_fit_duration_is_rejected() {
        let mut def = definition("a");
        def.fit = Some(FitPolicy::new(12.0, -1.0));
        assert!(matches!(
            LayerRegistry::new(vec![def]),
            Err(RegistryError::InvalidFit { .. })
        ));
    }

    #[test]
    fn definitions_load_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{"id": "routes", "name": "Routes", "kind": "line", "source": "static:/routes.geojson",
                  "style": {{"stroke": "rgb(10, 20, 30)"}}}},
                {{"id": "postes", "name": "Postes", "kind": "point", "source": "dynamic:/postes/",
                  "visible": false, "editable": true, "fit": {{"max_zoom": 13, "duration_ms": 400}}}}
            ]"#
        )
        .expect("write definitions");

        let registry = LayerRegistry::from_json_file(file.path()).expect("registry");
        let routes = registry.get("routes").expect("routes");
        assert_eq!(routes.kind, GeometryKind::Line);
        assert_eq!(routes.style.stroke, Some(Rgba::rgb(10, 20, 30)));
        assert_eq!(routes.style.stroke_width, 2.0);
        assert!(routes.visible);

        let postes = registry.get("postes").expect("postes");
        assert_eq!(postes.source, SourceDescriptor::Dynamic("postes".into()));
        assert_eq!(postes.fit.map(|f| f.padding), Some([50.0; 4]));
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = LayerRegistry::from_json_file(Path::new("/nonexistent/layers.json"))
            .expect_err("missing file");
        assert!(matches!(err, RegistryError::File { .. }));
    }

    #[test]
    fn from_env_defaults_to_builtin() {
        temp_env::with_var_unset("CARTE_LAYERS_FILE", || {
            let registry = LayerRegistry::from_env().expect("builtin");
            assert_eq!(registry.len(), 4);
        });
    }
}
