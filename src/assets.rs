use anyhow::{anyhow, Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::animation::{AnimationClip, KeyframeTrack};
use crate::scene::{Material, Mesh, SceneGraph, SceneNode};

/// The instant camera body with a printed photo plane and its eject clip
const POLAROID_SCENE: &str = r#"
[[nodes]]
name = "Polaroid"
translation = [0.0, 0.7, 0.0]

[[nodes.children]]
name = "Body"
[nodes.children.mesh]
name = "Camera_Body"
materials = [
    { name = "Shell", color = [236, 232, 224, 255] },
    { name = "Slot", color = [24, 24, 24, 255] },
]

[[nodes.children]]
name = "Plane"
[nodes.children.mesh]
name = "Plane_1"
materials = [
    { name = "Frame", color = [250, 250, 245, 255] },
    { name = "Image", color = [20, 20, 20, 255] },
]

[[clips]]
name = "PlaneAction"

[[clips.tracks]]
node = "Plane"
keys = [
    { time = 0.0, translation = [0.0, 0.0, 0.0] },
    { time = 0.25, translation = [0.0, -0.04, 0.0] },
    { time = 1.2, translation = [0.0, -1.1, 0.08] },
    { time = 1.5, translation = [0.0, -1.2, 0.1] },
]
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneAsset {
    #[serde(default)]
    pub nodes: Vec<NodeAsset>,
    #[serde(default)]
    pub clips: Vec<ClipAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAsset {
    pub name: String,
    #[serde(default)]
    pub translation: [f32; 3],
    pub mesh: Option<MeshAsset>,
    #[serde(default)]
    pub children: Vec<NodeAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshAsset {
    pub name: String,
    pub materials: Vec<MaterialAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialAsset {
    pub name: String,
    #[serde(default = "default_color")]
    pub color: [u8; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipAsset {
    pub name: String,
    pub tracks: Vec<TrackAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAsset {
    pub node: String,
    pub keys: Vec<KeyAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAsset {
    pub time: f32,
    pub translation: [f32; 3],
}

fn default_color() -> [u8; 4] {
    [255, 255, 255, 255]
}

/// A scene graph plus its named clips, ready for the print animator
pub struct LoadedScene {
    pub scene: SceneGraph,
    pub clips: Vec<Arc<AnimationClip>>,
}

pub fn builtin_polaroid() -> Result<LoadedScene> {
    parse_scene(POLAROID_SCENE).context("Built-in polaroid scene is invalid")
}

pub fn load_scene<P: AsRef<Path>>(path: P) -> Result<LoadedScene> {
    let contents = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read scene file: {}", path.as_ref().display()))?;
    let loaded = parse_scene(&contents)
        .with_context(|| format!("Failed to parse scene file: {}", path.as_ref().display()))?;

    log::info!(
        "Scene loaded from {} ({} clips)",
        path.as_ref().display(),
        loaded.clips.len()
    );
    Ok(loaded)
}

pub fn parse_scene(contents: &str) -> Result<LoadedScene> {
    let asset: SceneAsset = toml::from_str(contents)?;
    asset.into_loaded()
}

impl SceneAsset {
    pub fn into_loaded(self) -> Result<LoadedScene> {
        if self.nodes.is_empty() {
            return Err(anyhow!("Scene has no nodes"));
        }

        let clips = self
            .clips
            .into_iter()
            .map(|clip| clip.into_clip().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(LoadedScene {
            scene: SceneGraph::new(self.nodes.into_iter().map(NodeAsset::into_node).collect()),
            clips,
        })
    }
}

impl NodeAsset {
    fn into_node(self) -> SceneNode {
        let mut node = SceneNode::new(&self.name, Vector3::from(self.translation));
        if let Some(mesh) = self.mesh {
            let materials = mesh
                .materials
                .iter()
                .map(|m| Material::standard(&m.name, m.color))
                .collect();
            node = node.with_mesh(Mesh::new(&mesh.name, materials));
        }
        for child in self.children {
            node = node.with_child(child.into_node());
        }
        node
    }
}

impl ClipAsset {
    fn into_clip(self) -> Result<AnimationClip> {
        let mut tracks = Vec::with_capacity(self.tracks.len());
        for track in self.tracks {
            if track.keys.is_empty() {
                return Err(anyhow!("Track for '{}' in clip '{}' has no keys", track.node, self.name));
            }
            if track.keys.windows(2).any(|pair| pair[1].time < pair[0].time) {
                return Err(anyhow!(
                    "Track for '{}' in clip '{}' has keys out of order",
                    track.node,
                    self.name
                ));
            }

            let keys: Vec<(f32, [f32; 3])> = track.keys.iter().map(|k| (k.time, k.translation)).collect();
            tracks.push(KeyframeTrack::new(&track.node, &keys));
        }
        Ok(AnimationClip::new(&self.name, tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_polaroid_has_print_slot_and_clip() {
        let loaded = builtin_polaroid().unwrap();

        let mesh = loaded.scene.find_mesh("Plane_1").unwrap();
        assert!(mesh.material("Image").is_some());
        assert!(mesh.material("Frame").is_some());

        let clip = AnimationClip::find_by_name(&loaded.clips, "PlaneAction").unwrap();
        assert_eq!(clip.duration, 1.5);
        assert_eq!(clip.tracks[0].node, "Plane");
        assert!(loaded.scene.find_node("Plane").is_some());
    }

    #[test]
    fn test_out_of_order_keys_rejected() {
        let contents = r#"
            [[nodes]]
            name = "Root"

            [[clips]]
            name = "Broken"
            [[clips.tracks]]
            node = "Root"
            keys = [
                { time = 1.0, translation = [0.0, 0.0, 0.0] },
                { time = 0.5, translation = [0.0, 1.0, 0.0] },
            ]
        "#;
        assert!(parse_scene(contents).is_err());
    }

    #[test]
    fn test_empty_scene_rejected() {
        assert!(parse_scene("").is_err());
    }

    #[test]
    fn test_load_scene_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[nodes]]
            name = "Card"
            translation = [1.0, 2.0, 3.0]
            [nodes.mesh]
            name = "Plane_1"
            materials = [{{ name = "Image" }}]
            "#
        )
        .unwrap();

        let loaded = load_scene(file.path()).unwrap();
        assert!(loaded.clips.is_empty());
        let node = loaded.scene.find_node("Card").unwrap();
        assert_eq!(node.translation, Vector3::new(1.0, 2.0, 3.0));
        let material = loaded.scene.find_mesh("Plane_1").unwrap().material("Image").unwrap();
        assert_eq!(material.color, [255, 255, 255, 255]);
    }
}
