//! Manifest loading and rendering
//!
//! A manifest is one source of resources: a raw YAML file, a template
//! rendered against the feature's data bag, or an overlay directory built by
//! an external engine. Every variant renders into the same list of
//! `DynamicObject`s.

pub mod fs;
pub mod loader;
pub mod overlay;
pub mod transform;

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::ResourceExt;

use feature_common::kube_utils::is_cluster_scoped_kind;
use feature_common::template::TemplateEngine;
use feature_common::yaml::{parse_yaml, split_documents};
use feature_common::{Error, Result};

use crate::data::DataBag;
pub use fs::{DiskFs, ManifestFs, MemoryFs};
pub use loader::load_manifests;
pub use overlay::{KustomizeCli, OverlayEngine};
pub use transform::ResourceTransform;

/// Collaborators used while rendering
pub struct RenderEnv<'a> {
    /// Engine for templated manifests
    pub templates: &'a TemplateEngine,
    /// Engine for overlay manifests
    pub overlay: &'a dyn OverlayEngine,
    /// Enrichment applied to overlay output
    pub transforms: &'a [ResourceTransform],
}

/// Resources produced by one manifest
#[derive(Clone, Debug)]
pub struct RenderedManifest {
    /// Path of the manifest the resources came from
    pub source: String,
    /// Apply as merge patches instead of creating
    pub patch: bool,
    /// Rendered resources in document order
    pub resources: Vec<DynamicObject>,
}

/// YAML file applied as-is; documents are parsed at load time
#[derive(Clone, Debug)]
pub struct RawManifest {
    /// Path within the manifest filesystem
    pub path: String,
    /// Apply as merge patches
    pub patch: bool,
    /// Parsed documents
    pub resources: Vec<DynamicObject>,
}

/// YAML template rendered against the feature's data bag
#[derive(Clone, Debug)]
pub struct TemplateManifest {
    /// Path within the manifest filesystem
    pub path: String,
    /// Apply as merge patches
    pub patch: bool,
    /// Template source
    pub content: String,
}

/// Directory built into resources by an [`OverlayEngine`]
#[derive(Clone, Debug)]
pub struct OverlayManifest {
    /// Overlay directory within the manifest filesystem
    pub path: String,
    /// Filesystem holding the overlay
    pub fs: Arc<dyn ManifestFs>,
}

/// A source of resources
#[derive(Clone, Debug)]
pub enum Manifest {
    /// Verbatim YAML
    Raw(RawManifest),
    /// Template rendered with the data bag
    Templated(TemplateManifest),
    /// Overlay directory
    Overlay(OverlayManifest),
}

impl Manifest {
    /// Path the manifest was loaded from
    pub fn path(&self) -> &str {
        match self {
            Self::Raw(m) => &m.path,
            Self::Templated(m) => &m.path,
            Self::Overlay(m) => &m.path,
        }
    }

    /// Returns true if rendered resources are applied as merge patches
    pub fn is_patch(&self) -> bool {
        match self {
            Self::Raw(m) => m.patch,
            Self::Templated(m) => m.patch,
            Self::Overlay(_) => false,
        }
    }

    /// Render into resources.
    ///
    /// Every resource of a namespaced kind must carry a namespace once
    /// rendering and enrichment are done.
    pub async fn render(&self, data: &DataBag, env: &RenderEnv<'_>) -> Result<RenderedManifest> {
        let resources = match self {
            Self::Raw(m) => m.resources.clone(),
            Self::Templated(m) => {
                let rendered = env
                    .templates
                    .render(&m.content, data.as_template_context())
                    .map_err(|source| Error::Template {
                        path: m.path.clone(),
                        source,
                    })?;
                parse_documents(&m.path, &rendered)?
            }
            Self::Overlay(m) => render_overlay(m, env).await?,
        };

        Ok(RenderedManifest {
            source: self.path().to_string(),
            patch: self.is_patch(),
            resources,
        })
    }
}

async fn render_overlay(m: &OverlayManifest, env: &RenderEnv<'_>) -> Result<Vec<DynamicObject>> {
    let root = m.fs.disk_root().ok_or_else(|| {
        Error::overlay(&m.path, "overlay manifests need a filesystem backed by disk")
    })?;
    let dir = if m.path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&m.path)
    };

    let output = env.overlay.build(&dir).await?;

    let mut resources = parse_objects(&m.path, &output)?;
    for obj in resources.iter_mut() {
        for transform in env.transforms {
            transform.apply(obj);
        }
    }
    for obj in &resources {
        ensure_namespace(&m.path, obj)?;
    }
    Ok(resources)
}

/// Split content into documents and parse each into a resource that passes
/// the namespace check
pub fn parse_documents(path: &str, content: &str) -> Result<Vec<DynamicObject>> {
    let resources = parse_objects(path, content)?;
    for obj in &resources {
        ensure_namespace(path, obj)?;
    }
    Ok(resources)
}

fn parse_objects(path: &str, content: &str) -> Result<Vec<DynamicObject>> {
    let mut resources = Vec::new();
    for (index, doc) in split_documents(content).iter().enumerate() {
        let value = parse_yaml(doc)
            .map_err(|e| Error::manifest(path, format!("document {}: {}", index, e)))?;
        if value.is_null() {
            continue;
        }
        let obj: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::manifest(path, format!("document {}: {}", index, e)))?;
        if obj.types.is_none() {
            return Err(Error::manifest(
                path,
                format!("document {}: apiVersion and kind are required", index),
            ));
        }
        if obj.metadata.name.as_deref().map_or(true, str::is_empty) {
            return Err(Error::manifest(
                path,
                format!("document {}: metadata.name is required", index),
            ));
        }
        resources.push(obj);
    }
    Ok(resources)
}

/// Fail if a resource of a namespaced kind has no namespace
pub fn ensure_namespace(path: &str, obj: &DynamicObject) -> Result<()> {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
    let has_namespace = obj.namespace().is_some_and(|ns| !ns.is_empty());
    if !has_namespace && !is_cluster_scoped_kind(kind) {
        return Err(Error::manifest(
            path,
            format!("no namespace is set on {}/{}", kind, obj.name_any()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use overlay::MockOverlayEngine;

    fn template(path: &str, content: &str) -> Manifest {
        Manifest::Templated(TemplateManifest {
            path: path.to_string(),
            patch: false,
            content: content.to_string(),
        })
    }

    async fn render(manifest: &Manifest, data: &DataBag) -> Result<RenderedManifest> {
        let templates = TemplateEngine::new();
        let overlay = MockOverlayEngine::new();
        let env = RenderEnv {
            templates: &templates,
            overlay: &overlay,
            transforms: &[],
        };
        manifest.render(data, &env).await
    }

    #[test]
    fn test_parse_documents_multi() {
        let content = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: svc-ns\n---\n# only a comment\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n  namespace: svc-ns\n";
        let resources = parse_documents("a.yaml", content).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].types.as_ref().unwrap().kind, "Namespace");
        assert_eq!(resources[1].name_any(), "s");
    }

    #[test]
    fn test_parse_documents_requires_type_and_name() {
        let err = parse_documents("a.yaml", "metadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("apiVersion and kind"), "{err}");

        let err = parse_documents("a.yaml", "apiVersion: v1\nkind: Namespace\nmetadata: {}\n")
            .unwrap_err();
        assert!(err.to_string().contains("metadata.name"), "{err}");
    }

    #[test]
    fn test_namespace_check_names_object() {
        let err = parse_documents(
            "mesh/secret.yaml",
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: test-secret\n",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "manifest error [mesh/secret.yaml]: no namespace is set on Secret/test-secret"
        );
    }

    #[tokio::test]
    async fn test_template_renders_namespace_from_data() {
        let manifest = template(
            "secret.tmpl.yaml",
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: test-secret\n  namespace: {{ Namespace }}\n",
        );
        let mut data = DataBag::new();
        data.insert("Namespace", "svc-ns").unwrap();

        let rendered = render(&manifest, &data).await.unwrap();
        assert_eq!(rendered.source, "secret.tmpl.yaml");
        assert!(!rendered.patch);
        assert_eq!(rendered.resources.len(), 1);
        assert_eq!(rendered.resources[0].namespace().as_deref(), Some("svc-ns"));
    }

    #[tokio::test]
    async fn test_template_missing_data_is_template_error() {
        let manifest = template("secret.tmpl.yaml", "namespace: {{ Namespace }}\n");
        let err = render(&manifest, &DataBag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Template { ref path, .. } if path == "secret.tmpl.yaml"));
    }

    #[tokio::test]
    async fn test_template_rendering_empty_namespace_fails() {
        let manifest = template(
            "cm.tmpl.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n  namespace: \"{{ Namespace }}\"\n",
        );
        let mut data = DataBag::new();
        data.insert("Namespace", "").unwrap();
        let err = render(&manifest, &data).await.unwrap_err();
        assert!(err.to_string().contains("no namespace is set on ConfigMap/c"));
    }

    #[tokio::test]
    async fn test_overlay_output_is_enriched_then_checked() {
        let dir = tempfile::tempdir().unwrap();
        let expected_dir: PathBuf = dir.path().join("kserve");
        let manifest = Manifest::Overlay(OverlayManifest {
            path: "kserve".to_string(),
            fs: Arc::new(DiskFs::new(dir.path())),
        });

        let mut overlay = MockOverlayEngine::new();
        overlay
            .expect_build()
            .withf(move |dir| dir == expected_dir.as_path())
            .times(1)
            .returning(|_| {
                Ok("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n---\napiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: reader\n".to_string())
            });

        let templates = TemplateEngine::new();
        let transforms = vec![
            ResourceTransform::SetNamespace("svc-ns".to_string()),
            ResourceTransform::component_labels("kserve"),
        ];
        let env = RenderEnv {
            templates: &templates,
            overlay: &overlay,
            transforms: &transforms,
        };

        let rendered = manifest.render(&DataBag::new(), &env).await.unwrap();
        assert_eq!(rendered.resources.len(), 2);
        assert_eq!(rendered.resources[0].namespace().as_deref(), Some("svc-ns"));
        assert_eq!(rendered.resources[1].namespace(), None);
        let labels: &BTreeMap<String, String> = rendered.resources[1].labels();
        assert_eq!(labels["app.kubernetes.io/part-of"], "kserve");
    }

    #[tokio::test]
    async fn test_overlay_without_namespace_transform_fails_check() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::Overlay(OverlayManifest {
            path: "kserve".to_string(),
            fs: Arc::new(DiskFs::new(dir.path())),
        });
        let mut overlay = MockOverlayEngine::new();
        overlay.expect_build().returning(|_| {
            Ok("apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n".to_string())
        });
        let templates = TemplateEngine::new();
        let env = RenderEnv {
            templates: &templates,
            overlay: &overlay,
            transforms: &[],
        };

        let err = manifest.render(&DataBag::new(), &env).await.unwrap_err();
        assert!(err.to_string().contains("Service/web"));
    }

    #[tokio::test]
    async fn test_overlay_on_memory_fs_fails() {
        let manifest = Manifest::Overlay(OverlayManifest {
            path: "kserve".to_string(),
            fs: Arc::new(MemoryFs::new()),
        });
        let err = render(&manifest, &DataBag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Overlay { .. }));
    }
}
