use image::RgbaImage;
use nalgebra::Vector3;
use std::sync::Arc;

// ============================================================================
// TEXTURES AND MATERIALS
// ============================================================================

/// Pixels laid out the way the renderer samples them: row 0 is v = 0,
/// the bottom edge of the visible image.
#[derive(Debug)]
pub struct Texture {
    label: String,
    pixels: RgbaImage,
}

impl Texture {
    pub fn from_engine_rows(label: &str, pixels: RgbaImage) -> Self {
        Self {
            label: label.to_string(),
            pixels,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[cfg(test)]
    pub fn engine_rows(&self) -> &RgbaImage {
        &self.pixels
    }

    /// The image as it appears on screen, top row first
    pub fn to_display_rgba(&self) -> RgbaImage {
        image::imageops::flip_vertical(&self.pixels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Standard,
    Matcap,
}

/// Materials are immutable once shared; changing one means building a new
/// `Arc<Material>` and swapping it into the slot.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub map: Option<Arc<Texture>>,
    pub tone_mapped: bool,
    pub color: [u8; 4],
}

impl Material {
    pub fn standard(name: &str, color: [u8; 4]) -> Self {
        Self {
            name: name.to_string(),
            kind: MaterialKind::Standard,
            map: None,
            tone_mapped: true,
            color,
        }
    }

    /// Unlit photo material: shows the texture as-is
    pub fn matcap(name: &str, map: Arc<Texture>) -> Self {
        Self {
            name: name.to_string(),
            kind: MaterialKind::Matcap,
            map: Some(map),
            tone_mapped: false,
            color: [255, 255, 255, 255],
        }
    }
}

// ============================================================================
// SCENE GRAPH
// ============================================================================

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    materials: Vec<Arc<Material>>,
}

impl Mesh {
    pub fn new(name: &str, materials: Vec<Material>) -> Self {
        Self {
            name: name.to_string(),
            materials: materials.into_iter().map(Arc::new).collect(),
        }
    }

    #[cfg(test)]
    pub fn materials(&self) -> &[Arc<Material>] {
        &self.materials
    }

    pub fn material(&self, slot: &str) -> Option<&Arc<Material>> {
        self.materials.iter().find(|m| m.name == slot)
    }

    /// Swap the material in `slot`, returning the one it replaced
    pub fn replace_material(&mut self, slot: &str, material: Arc<Material>) -> Option<Arc<Material>> {
        let entry = self.materials.iter_mut().find(|m| m.name == slot)?;
        Some(std::mem::replace(entry, material))
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub translation: Vector3<f32>,
    pub mesh: Option<Mesh>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: &str, translation: Vector3<f32>) -> Self {
        Self {
            name: name.to_string(),
            translation,
            mesh: None,
            children: Vec::new(),
        }
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    fn traverse(&self, visit: &mut dyn FnMut(&SceneNode)) {
        visit(self);
        for child in &self.children {
            child.traverse(visit);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    pub roots: Vec<SceneNode>,
}

impl SceneGraph {
    pub fn new(roots: Vec<SceneNode>) -> Self {
        Self { roots }
    }

    pub fn traverse(&self, visit: &mut dyn FnMut(&SceneNode)) {
        for root in &self.roots {
            root.traverse(visit);
        }
    }

    pub fn find_node(&self, name: &str) -> Option<&SceneNode> {
        find_in(&self.roots, &|node: &SceneNode| node.name == name)
    }

    pub fn find_node_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        find_in_mut(&mut self.roots, &|node: &SceneNode| node.name == name)
    }

    pub fn find_mesh(&self, mesh_name: &str) -> Option<&Mesh> {
        find_in(&self.roots, &|node: &SceneNode| {
            node.mesh.as_ref().is_some_and(|m| m.name == mesh_name)
        })
        .and_then(|node| node.mesh.as_ref())
    }

    pub fn find_mesh_mut(&mut self, mesh_name: &str) -> Option<&mut Mesh> {
        find_in_mut(&mut self.roots, &|node: &SceneNode| {
            node.mesh.as_ref().is_some_and(|m| m.name == mesh_name)
        })
        .and_then(|node| node.mesh.as_mut())
    }

    /// Install a new photo material for `binding`. Returns the material that
    /// was swapped out, or `None` when the mesh or slot does not exist.
    pub fn apply_binding(&mut self, binding: &TextureBinding) -> Option<Arc<Material>> {
        let mesh = self.find_mesh_mut(&binding.mesh)?;
        let material = Arc::new(Material::matcap(&binding.slot, Arc::clone(&binding.texture)));
        mesh.replace_material(&binding.slot, material)
    }
}

fn find_in<'a>(nodes: &'a [SceneNode], pred: &impl Fn(&SceneNode) -> bool) -> Option<&'a SceneNode> {
    for node in nodes {
        if pred(node) {
            return Some(node);
        }
        if let Some(found) = find_in(&node.children, pred) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(
    nodes: &'a mut [SceneNode],
    pred: &impl Fn(&SceneNode) -> bool,
) -> Option<&'a mut SceneNode> {
    for node in nodes.iter_mut() {
        if pred(node) {
            return Some(node);
        }
        if let Some(found) = find_in_mut(&mut node.children, pred) {
            return Some(found);
        }
    }
    None
}

// ============================================================================
// BINDINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSource {
    Still,
    Fallback,
}

/// Which texture currently shows in a mesh's material slot
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub mesh: String,
    pub slot: String,
    pub texture: Arc<Texture>,
    pub source: PrintSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn photo_scene() -> SceneGraph {
        let plane = Mesh::new(
            "Plane_1",
            vec![
                Material::standard("Frame", [250, 250, 245, 255]),
                Material::standard("Image", [30, 30, 30, 255]),
            ],
        );
        SceneGraph::new(vec![SceneNode::new("Polaroid", Vector3::zeros())
            .with_child(SceneNode::new("Plane", Vector3::new(0.0, 0.1, 0.0)).with_mesh(plane))])
    }

    fn texture(label: &str) -> Arc<Texture> {
        Arc::new(Texture::from_engine_rows(label, RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))))
    }

    #[test]
    fn test_find_nested_nodes() {
        let mut scene = photo_scene();
        assert!(scene.find_node("Plane").is_some());
        assert!(scene.find_mesh("Plane_1").is_some());
        assert!(scene.find_mesh("Plane").is_none());

        scene.find_node_mut("Plane").unwrap().translation.y = 2.0;
        assert_eq!(scene.find_node("Plane").unwrap().translation.y, 2.0);

        let mut names = Vec::new();
        scene.traverse(&mut |node| names.push(node.name.clone()));
        assert_eq!(names, vec!["Polaroid", "Plane"]);
    }

    #[test]
    fn test_binding_replaces_material_without_touching_old() {
        let mut scene = photo_scene();
        let readers_copy = Arc::clone(scene.find_mesh("Plane_1").unwrap().material("Image").unwrap());

        let binding = TextureBinding {
            mesh: "Plane_1".to_string(),
            slot: "Image".to_string(),
            texture: texture("photo"),
            source: PrintSource::Still,
        };
        let old = scene.apply_binding(&binding).unwrap();
        assert!(Arc::ptr_eq(&old, &readers_copy));
        assert!(readers_copy.map.is_none());

        let mesh = scene.find_mesh("Plane_1").unwrap();
        let current = mesh.material("Image").unwrap();
        assert_eq!(current.kind, MaterialKind::Matcap);
        assert!(!current.tone_mapped);
        assert_eq!(current.map.as_ref().unwrap().label(), "photo");

        // Other slots are untouched and order is preserved
        assert_eq!(mesh.materials().len(), 2);
        assert_eq!(mesh.materials()[0].name, "Frame");
        assert_eq!(mesh.materials()[1].name, "Image");
    }

    #[test]
    fn test_binding_missing_target() {
        let mut scene = photo_scene();
        let mut binding = TextureBinding {
            mesh: "Plane_2".to_string(),
            slot: "Image".to_string(),
            texture: texture("photo"),
            source: PrintSource::Fallback,
        };
        assert!(scene.apply_binding(&binding).is_none());

        binding.mesh = "Plane_1".to_string();
        binding.slot = "Sticker".to_string();
        assert!(scene.apply_binding(&binding).is_none());
    }

    #[test]
    fn test_display_rows_are_engine_rows_reversed() {
        let mut pixels = RgbaImage::from_pixel(1, 2, Rgba([0, 0, 0, 255]));
        pixels.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let texture = Texture::from_engine_rows("t", pixels);

        let display = texture.to_display_rgba();
        assert_eq!(*display.get_pixel(0, 1), Rgba([255, 0, 0, 255]));
        assert_eq!((texture.width(), texture.height()), (1, 2));
    }
}
