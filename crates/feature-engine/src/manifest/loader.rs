//! Discovery and classification of manifest files
//!
//! A path is classified file by file:
//! - a directory holding an overlay configuration file becomes one overlay,
//!   and nothing below it is loaded individually
//! - a file whose name contains `.tmpl` is a template
//! - any other file is raw
//!
//! A `.patch` marker in the file name switches application to merge-patch.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use feature_common::{Error, Result};

use super::fs::{file_name, normalize_path, parent_dir, ManifestFs};
use super::{parse_documents, Manifest, OverlayManifest, RawManifest, TemplateManifest};

/// File names that mark a directory as an overlay
pub const OVERLAY_CONFIG_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// File name marker for templates
pub const TEMPLATE_MARKER: &str = ".tmpl";

/// File name marker for merge patches
pub const PATCH_MARKER: &str = ".patch";

/// Returns true if the file is an overlay configuration file
pub fn is_overlay_config(path: &str) -> bool {
    OVERLAY_CONFIG_FILES.contains(&file_name(path))
}

/// Returns true if the file is a template
pub fn is_template(path: &str) -> bool {
    file_name(path).contains(TEMPLATE_MARKER)
}

/// Returns true if the file is a merge patch
pub fn is_patch(path: &str) -> bool {
    file_name(path).contains(PATCH_MARKER)
}

/// Load every manifest at or below `path`.
///
/// File contents are read eagerly and raw documents are parsed, so malformed
/// manifests fail here rather than while the feature is applied.
pub fn load_manifests(fs: &Arc<dyn ManifestFs>, path: &str) -> Result<Vec<Manifest>> {
    let path = normalize_path(path)?;
    if !fs.exists(&path) {
        return Err(Error::manifest(&path, "no such file or directory"));
    }

    let files = fs.walk_files(&path)?;
    let overlay_roots = overlay_roots(&files);

    let mut manifests = Vec::new();
    let mut emitted_overlays = BTreeSet::new();

    for file in &files {
        if let Some(root) = overlay_roots.iter().find(|root| is_within(file, root)) {
            if emitted_overlays.insert(root.clone()) {
                debug!(path = %root, "Loaded overlay manifest");
                manifests.push(Manifest::Overlay(OverlayManifest {
                    path: root.clone(),
                    fs: fs.clone(),
                }));
            }
            continue;
        }

        let content = fs.read_to_string(file)?;
        let patch = is_patch(file);

        if is_template(file) {
            debug!(path = %file, patch, "Loaded template manifest");
            manifests.push(Manifest::Templated(TemplateManifest {
                path: file.clone(),
                patch,
                content,
            }));
        } else {
            let resources = parse_documents(file, &content)?;
            debug!(path = %file, patch, documents = resources.len(), "Loaded raw manifest");
            manifests.push(Manifest::Raw(RawManifest {
                path: file.clone(),
                patch,
                resources,
            }));
        }
    }

    Ok(manifests)
}

/// Directories holding an overlay configuration file, excluding those
/// nested inside another overlay
fn overlay_roots(files: &[String]) -> Vec<String> {
    let candidates: BTreeSet<&str> = files
        .iter()
        .filter(|f| is_overlay_config(f))
        .map(|f| parent_dir(f))
        .collect();

    candidates
        .iter()
        .filter(|dir| {
            !candidates
                .iter()
                .any(|other| other != *dir && is_within(dir, other))
        })
        .map(|dir| dir.to_string())
        .collect()
}

fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::fs::MemoryFs;

    const SECRET: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n  namespace: ns\n";

    fn fs(files: &[(&str, &str)]) -> Arc<dyn ManifestFs> {
        let mut mem = MemoryFs::new();
        for (path, content) in files {
            mem.insert(path, *content);
        }
        Arc::new(mem)
    }

    fn kinds(manifests: &[Manifest]) -> Vec<(&'static str, String)> {
        manifests
            .iter()
            .map(|m| {
                let kind = match m {
                    Manifest::Raw(_) => "raw",
                    Manifest::Templated(_) => "template",
                    Manifest::Overlay(_) => "overlay",
                };
                (kind, m.path().to_string())
            })
            .collect()
    }

    #[test]
    fn test_classification_is_exclusive_per_file() {
        let fs = fs(&[
            ("mesh/secret.yaml", SECRET),
            ("mesh/smcp.tmpl.yaml", "{{ Namespace }}"),
            ("mesh/smm.patch.tmpl.yaml", "{{ Namespace }}"),
        ]);

        let manifests = load_manifests(&fs, "mesh").unwrap();
        assert_eq!(
            kinds(&manifests),
            vec![
                ("raw", "mesh/secret.yaml".to_string()),
                ("template", "mesh/smcp.tmpl.yaml".to_string()),
                ("template", "mesh/smm.patch.tmpl.yaml".to_string()),
            ]
        );
        assert!(!manifests[1].is_patch());
        assert!(manifests[2].is_patch());
    }

    #[test]
    fn test_overlay_directory_loads_once() {
        let fs = fs(&[
            ("kserve/kustomization.yaml", "resources: [deploy.yaml]"),
            ("kserve/deploy.yaml", "not parsed"),
            ("kserve/nested/kustomization.yaml", "resources: []"),
        ]);

        let manifests = load_manifests(&fs, "kserve").unwrap();
        assert_eq!(kinds(&manifests), vec![("overlay", "kserve".to_string())]);
    }

    #[test]
    fn test_overlay_below_path_is_detected() {
        let fs = fs(&[
            ("features/base/kustomization.yaml", "resources: []"),
            ("features/secret.yaml", SECRET),
        ]);

        let manifests = load_manifests(&fs, "features").unwrap();
        assert_eq!(
            kinds(&manifests),
            vec![
                ("overlay", "features/base".to_string()),
                ("raw", "features/secret.yaml".to_string()),
            ]
        );
    }

    #[test]
    fn test_single_file_path() {
        let fs = fs(&[("mesh/secret.yaml", SECRET), ("mesh/other.yaml", SECRET)]);
        let manifests = load_manifests(&fs, "./mesh/secret.yaml").unwrap();
        assert_eq!(kinds(&manifests), vec![("raw", "mesh/secret.yaml".to_string())]);
    }

    #[test]
    fn test_missing_path_fails() {
        let fs = fs(&[("mesh/secret.yaml", SECRET)]);
        let err = load_manifests(&fs, "serverless").unwrap_err();
        assert!(err.to_string().contains("no such file or directory"));
    }

    #[test]
    fn test_invalid_raw_document_aborts_load() {
        let fs = fs(&[
            ("mesh/a.yaml", SECRET),
            ("mesh/b.yaml", "kind: [unclosed"),
        ]);
        assert!(matches!(
            load_manifests(&fs, "mesh"),
            Err(Error::Manifest { .. })
        ));
    }

    #[test]
    fn test_commented_separator_fails_load_instead_of_dropping_documents() {
        let content = format!(
            "{SECRET}--- # settings\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: ns\n"
        );
        let fs = fs(&[("mesh/a.yaml", content.as_str())]);

        let err = load_manifests(&fs, "mesh").unwrap_err();

        assert!(matches!(err, Error::Manifest { .. }), "{err}");
        assert!(err.to_string().contains("expected one document"), "{err}");
    }

    #[test]
    fn test_raw_document_without_namespace_fails_load() {
        let fs = fs(&[(
            "mesh/cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )]);
        let err = load_manifests(&fs, "mesh").unwrap_err();
        assert!(err.to_string().contains("ConfigMap/settings"), "{err}");
    }
}
