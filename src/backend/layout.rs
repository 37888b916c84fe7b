//! Daemon-less backend writing an OCI image layout
//!
//! Stages run in order against an in-memory image record. COPY stages
//! become real gzip layers built from the context snapshot; RUN stages are
//! recorded in history only, since nothing here can execute Linux
//! binaries. Dependency install instead records the pinned package set the
//! manifest resolves to. Output is byte-stable for unchanged inputs.

use super::oci::{
    OciDescriptor, OciHistory, OciImageConfig, OciIndex, OciLayout, OciManifest, RootFs,
    ANNOTATION_REF_NAME, CONFIG_MEDIA_TYPE, INDEX_FILE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
    OCI_LAYOUT_FILE,
};
use super::{
    resolve_in_image, BuildBackend, BuildError, BuildRequest, BASE_NAME_LABEL, MANIFEST_LABEL,
    PACKAGES_LABEL,
};
use crate::context::archive::{gzip, write_tar};
use crate::context::TarEntry;
use crate::descriptor::{Stage, StageKind, StageSpec};
use crate::fs::RealFileSystem;
use crate::image::{BuiltImage, Digest, HistoryEntry, ImageConfig, ImageReference, LayerRecord};
use crate::manifest::{DependencyManifest, PackageSet};
use crate::progress::{ProgressEvent, ProgressHandler};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct LayoutBackend {
    root: PathBuf,
}

/// A layer written to the staging directory
struct WrittenLayer {
    descriptor: OciDescriptor,
    diff_id: Digest,
    record: LayerRecord,
}

/// Mutable state of one build, discarded on failure
struct LayoutBuild<'a> {
    request: &'a BuildRequest,
    staging: PathBuf,
    base: Option<ImageReference>,
    config: ImageConfig,
    layers: Vec<WrittenLayer>,
    history: Vec<HistoryEntry>,
}

fn io_error(context: &str, path: &Path, err: impl std::fmt::Display) -> BuildError {
    BuildError::Backend(format!("{} {}: {}", context, path.display(), err))
}

fn oci_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

fn created_timestamp(mtime: u64) -> String {
    chrono::DateTime::from_timestamp(mtime as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn write_blob(layout: &Path, bytes: &[u8]) -> Result<Digest, BuildError> {
    let digest = Digest::sha256(bytes);
    let path = digest.to_blob_path(layout);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
    }
    fs::write(&path, bytes).map_err(|e| io_error("Failed to write blob", &path, e))?;
    Ok(digest)
}

fn write_json<T: Serialize>(layout: &Path, value: &T) -> Result<(Digest, u64), BuildError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| BuildError::Backend(format!("Failed to serialize layout document: {}", e)))?;
    let digest = write_blob(layout, &bytes)?;
    Ok((digest, bytes.len() as u64))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, BuildError> {
    let bytes = fs::read(path).map_err(|e| io_error("Failed to read", path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| io_error("Failed to parse", path, e))
}

/// `/app` + `.` -> `app`; the leading slash is dropped for tar paths
fn layer_dir(workdir: Option<&str>, dest: &str) -> String {
    resolve_in_image(workdir, dest)
        .trim_matches('/')
        .to_string()
}

fn packages_label(packages: &PackageSet) -> String {
    packages
        .iter()
        .map(|(name, version)| format!("{}=={}", name, version))
        .collect::<Vec<_>>()
        .join(",")
}

fn packages_from_label(label: &str) -> PackageSet {
    PackageSet::from_freeze(&label.replace(',', "\n"))
}

impl<'a> LayoutBuild<'a> {
    fn new(request: &'a BuildRequest, staging: PathBuf) -> Self {
        Self {
            request,
            staging,
            base: None,
            config: ImageConfig::default(),
            layers: Vec::new(),
            history: Vec::new(),
        }
    }

    fn record(&mut self, stage: StageKind, created_by: String, empty_layer: bool) {
        self.history.push(HistoryEntry {
            created_by,
            empty_layer,
            stage: Some(stage),
        });
    }

    fn run_stage(&mut self, stage: &Stage, progress: &dyn ProgressHandler) -> Result<(), BuildError> {
        let kind = stage.kind;
        let instruction = self
            .request
            .descriptor
            .instructions()
            .into_iter()
            .find(|(kinds, _)| kinds.contains(&kind))
            .map(|(_, i)| i.single_line())
            .unwrap_or_else(|| stage.summary());

        match &stage.spec {
            StageSpec::Image { image } => {
                self.base = Some(image.clone());
                self.config
                    .labels
                    .insert(BASE_NAME_LABEL.to_string(), image.to_string());
                self.config.labels.extend(
                    self.request
                        .descriptor
                        .labels()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                self.config.env.extend(
                    self.request
                        .descriptor
                        .env()
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v)),
                );
                self.record(kind, format!("FROM {}", image), true);
            }
            StageSpec::Path { path } if kind == StageKind::WorkingDirectory => {
                self.config.working_dir = Some(path.clone());
                self.record(kind, format!("WORKDIR {}", path), true);
            }
            StageSpec::Copy { src, dest } => {
                let target = layer_dir(self.config.working_dir.as_deref(), dest);
                let entries = self
                    .request
                    .context
                    .select(src, &target)
                    .map_err(|e| BuildError::stage_failed(kind, e))?
                    .ok_or_else(|| BuildError::MissingInput {
                        stage: kind,
                        path: src.clone(),
                    })?;
                self.write_layer(kind, &entries)?;
                progress.on_progress(&ProgressEvent::StageLog {
                    stage: kind,
                    line: format!("copied {} into /{}", src, target),
                });
                self.record(kind, format!("COPY {} {}", src, dest), false);
            }
            StageSpec::Install { manifest, .. } => {
                self.install(kind, manifest, progress)?;
                self.record(kind, instruction, true);
            }
            StageSpec::Command {
                program,
                args,
                shell,
                entrypoint,
            } => {
                let mut argv = vec![program.clone()];
                argv.extend(args.iter().cloned());
                let argv = if *shell {
                    vec!["/bin/sh".to_string(), "-c".to_string(), argv.join(" ")]
                } else {
                    argv
                };
                if *entrypoint {
                    self.config.entrypoint = argv;
                } else {
                    self.config.cmd = argv;
                }
                self.record(kind, instruction, true);
            }
            _ if kind.is_run() => {
                progress.on_progress(&ProgressEvent::StageLog {
                    stage: kind,
                    line: format!("recorded without executing: {}", stage.summary()),
                });
                self.record(kind, instruction, true);
            }
            other => {
                return Err(BuildError::stage_failed(
                    kind,
                    format!("unexpected stage input {:?}", other),
                ))
            }
        }
        Ok(())
    }

    fn install(
        &mut self,
        kind: StageKind,
        manifest: &str,
        progress: &dyn ProgressHandler,
    ) -> Result<(), BuildError> {
        // Resolve the manifest through the stage that copied it
        let copied_src = match self
            .request
            .descriptor
            .stage(StageKind::ManifestCopy)
            .map(|s| &s.spec)
        {
            Some(StageSpec::Copy { src, .. }) => src.clone(),
            _ => manifest.to_string(),
        };
        let path = self.request.context.root().join(&copied_src);
        if !path.is_file() {
            return Err(BuildError::MissingInput {
                stage: kind,
                path: manifest.to_string(),
            });
        }

        let manifest = DependencyManifest::load(&RealFileSystem, &path)
            .map_err(|e| BuildError::stage_failed(kind, e))?;

        for req in manifest.unpinned() {
            warn!(requirement = %req, line = req.line, "Requirement is not pinned");
            progress.on_progress(&ProgressEvent::StageLog {
                stage: kind,
                line: format!("unpinned requirement: {}", req),
            });
        }

        let packages = manifest.expected_packages();
        self.config
            .labels
            .insert(PACKAGES_LABEL.to_string(), packages_label(&packages));
        self.config
            .labels
            .insert(MANIFEST_LABEL.to_string(), manifest.fingerprint().to_string());

        progress.on_progress(&ProgressEvent::StageLog {
            stage: kind,
            line: format!("recorded {} pinned packages", packages.len()),
        });
        Ok(())
    }

    fn write_layer(
        &mut self,
        stage: StageKind,
        entries: &[TarEntry],
    ) -> Result<(), BuildError> {
        let mtime = self.request.context.mtime();
        let tar = write_tar(entries, mtime).map_err(|e| BuildError::stage_failed(stage, e))?;
        let diff_id = Digest::sha256(&tar);
        let gz = gzip(&tar).map_err(|e| BuildError::stage_failed(stage, e))?;
        let digest = write_blob(&self.staging, &gz)?;
        let size = gz.len() as u64;

        debug!(stage = %stage, digest = %digest, size, "Wrote layer");
        self.layers.push(WrittenLayer {
            descriptor: OciDescriptor::new(LAYER_MEDIA_TYPE, digest.clone(), size),
            diff_id,
            record: LayerRecord {
                digest,
                size,
                stage,
            },
        });
        Ok(())
    }

    fn finish(self) -> Result<BuiltImage, BuildError> {
        let created = created_timestamp(self.request.context.mtime());

        let image_config = OciImageConfig {
            created: created.clone(),
            architecture: oci_architecture().to_string(),
            os: "linux".to_string(),
            config: self.config.clone(),
            rootfs: RootFs {
                kind: "layers".to_string(),
                diff_ids: self.layers.iter().map(|l| l.diff_id.clone()).collect(),
            },
            history: self
                .history
                .iter()
                .map(|h| OciHistory {
                    created: created.clone(),
                    created_by: h.created_by.clone(),
                    empty_layer: h.empty_layer,
                })
                .collect(),
        };
        let (config_digest, config_size) = write_json(&self.staging, &image_config)?;

        let manifest = OciManifest::new(
            OciDescriptor::new(CONFIG_MEDIA_TYPE, config_digest.clone(), config_size),
            self.layers.iter().map(|l| l.descriptor.clone()).collect(),
        );
        let (manifest_digest, manifest_size) = write_json(&self.staging, &manifest)?;

        let mut manifest_descriptor =
            OciDescriptor::new(MANIFEST_MEDIA_TYPE, manifest_digest, manifest_size);
        manifest_descriptor
            .annotations
            .insert(ANNOTATION_REF_NAME.to_string(), self.request.tag.to_string());

        let index = OciIndex::single(manifest_descriptor);
        write_document(&self.staging.join(INDEX_FILE), &index)?;
        write_document(&self.staging.join(OCI_LAYOUT_FILE), &OciLayout::default())?;

        let base = self.base.clone().ok_or_else(|| {
            BuildError::Backend("build finished without a base image".to_string())
        })?;

        Ok(BuiltImage {
            reference: self.request.tag.clone(),
            id: config_digest,
            base,
            config: self.config,
            layers: self.layers.into_iter().map(|l| l.record).collect(),
            history: self.history,
            backend: "layout".to_string(),
            location: None,
        })
    }
}

fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), BuildError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| BuildError::Backend(format!("Failed to serialize {}: {}", path.display(), e)))?;
    fs::write(path, bytes).map_err(|e| io_error("Failed to write", path, e))
}

fn run_stages(
    request: &BuildRequest,
    staging: &Path,
    progress: &dyn ProgressHandler,
) -> Result<BuiltImage, BuildError> {
    let mut build = LayoutBuild::new(request, staging.to_path_buf());
    for stage in request.descriptor.stages() {
        let started = Instant::now();
        progress.on_progress(&ProgressEvent::StageStarted { stage: stage.kind });
        build.run_stage(stage, progress)?;
        progress.on_progress(&ProgressEvent::StageComplete {
            stage: stage.kind,
            duration: started.elapsed(),
        });
    }
    build.finish()
}

/// Move a finished staging layout to `final_dir`. An existing layout is set
/// aside first and put back if the swap fails, so a reader sees either the
/// old image or the new one.
fn publish(staging: &Path, final_dir: &Path) -> Result<(), BuildError> {
    let parent = final_dir.parent().unwrap_or(Path::new("."));
    let previous = if final_dir.exists() {
        let aside = parent.join(format!(".old-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::rename(final_dir, &aside) {
            discard(staging);
            return Err(io_error("Failed to replace", final_dir, e));
        }
        Some(aside)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, final_dir) {
        if let Some(aside) = &previous {
            if let Err(restore) = fs::rename(aside, final_dir) {
                warn!(path = %aside.display(), error = %restore, "Failed to restore previous layout");
            }
        }
        discard(staging);
        return Err(io_error("Failed to move layout into", final_dir, e));
    }

    if let Some(aside) = previous {
        discard(&aside);
    }
    Ok(())
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(path = %dir.display(), error = %e, "Failed to remove directory");
    }
}

impl LayoutBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the layout for `reference`
    pub fn image_dir(&self, reference: &ImageReference) -> PathBuf {
        self.root.join(reference.slug())
    }

    fn load(&self, reference: &ImageReference) -> Result<(PathBuf, OciManifest, OciImageConfig), BuildError> {
        let dir = self.image_dir(reference);
        let index_path = dir.join(INDEX_FILE);
        if !index_path.is_file() {
            return Err(BuildError::Backend(format!(
                "Image {} not found in {}",
                reference,
                self.root.display()
            )));
        }

        let index: OciIndex = read_json(&index_path)?;
        let descriptor = index.find(&reference.to_string()).ok_or_else(|| {
            BuildError::Backend(format!("No manifest for {} in {}", reference, dir.display()))
        })?;
        let manifest: OciManifest = read_json(&descriptor.digest.to_blob_path(&dir))?;
        let config: OciImageConfig = read_json(&manifest.config.digest.to_blob_path(&dir))?;
        Ok((dir, manifest, config))
    }

    fn layer_contains(&self, blob: &Path, wanted: &str) -> Result<bool, BuildError> {
        let file = fs::File::open(blob).map_err(|e| io_error("Failed to open layer", blob, e))?;
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(file)
            .read_to_end(&mut decoded)
            .map_err(|e| io_error("Failed to decompress layer", blob, e))?;

        let mut archive = tar::Archive::new(decoded.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| io_error("Failed to read layer", blob, e))?;
        let dir_prefix = format!("{}/", wanted);
        for entry in entries {
            let entry = entry.map_err(|e| io_error("Failed to read layer entry", blob, e))?;
            let path = entry
                .path()
                .map_err(|e| io_error("Invalid path in layer", blob, e))?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            if path == wanted || path.starts_with(&dir_prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl BuildBackend for LayoutBackend {
    fn name(&self) -> &'static str {
        "layout"
    }

    async fn build(
        &self,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuiltImage, BuildError> {
        let final_dir = self.image_dir(&request.tag);
        let staging = self
            .root
            .join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&staging).map_err(|e| io_error("Failed to create", &staging, e))?;

        let mut image = match run_stages(request, &staging, progress) {
            Ok(image) => image,
            Err(e) => {
                discard(&staging);
                return Err(e);
            }
        };

        publish(&staging, &final_dir)?;

        info!(
            image = %image.reference,
            id = image.id.short(),
            layers = image.layers.len(),
            path = %final_dir.display(),
            "Wrote OCI layout"
        );
        image.location = Some(final_dir);
        Ok(image)
    }

    async fn inspect(&self, image: &ImageReference) -> Result<ImageConfig, BuildError> {
        let (_, _, config) = self.load(image)?;
        Ok(config.config)
    }

    async fn installed_packages(&self, image: &ImageReference) -> Result<PackageSet, BuildError> {
        let (_, _, config) = self.load(image)?;
        Ok(config
            .config
            .label(PACKAGES_LABEL)
            .map(packages_from_label)
            .unwrap_or_default())
    }

    async fn contains_path(&self, image: &ImageReference, path: &str) -> Result<bool, BuildError> {
        let (dir, manifest, config) = self.load(image)?;
        let wanted = resolve_in_image(config.config.working_dir.as_deref(), path)
            .trim_matches('/')
            .to_string();
        if wanted.is_empty() {
            return Ok(true);
        }

        for layer in &manifest.layers {
            if self.layer_contains(&layer.digest.to_blob_path(&dir), &wanted)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
