//! Shared fixtures for integration tests

#![allow(dead_code)]

use botbox::backend::LayoutBackend;
use botbox::context::ContextSettings;
use botbox::descriptor::{BuildDescriptor, DescriptorSettings};
use botbox::image::ImageReference;
use botbox::pipeline::PipelineContext;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const REQUIREMENTS: &str = "\
# telegram bot runtime
aiogram==3.4.1
aiohttp==3.9.3
python-dotenv==1.0.1
";

pub const MAIN_PY: &str = "\
import asyncio


async def main():
    pass


if __name__ == \"__main__\":
    asyncio.run(main())
";

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, content).expect("Failed to write fixture file");
}

/// A bot project with a requirements file and an `app` package
pub fn bot_project() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_file(dir.path(), "requirements.txt", REQUIREMENTS);
    write_file(dir.path(), "app/__init__.py", "");
    write_file(dir.path(), "app/main.py", MAIN_PY);
    write_file(dir.path(), "app/handlers.py", "HANDLERS = []\n");
    dir
}

pub fn reference(s: &str) -> ImageReference {
    ImageReference::parse(s).expect("valid reference")
}

/// Pipeline over `project` writing to a layout under `out`, with a fixed
/// archive timestamp so builds are comparable
pub fn layout_pipeline(project: &Path, out: &Path, tag: &str) -> PipelineContext {
    PipelineContext::new(
        project.to_path_buf(),
        BuildDescriptor::standard(&DescriptorSettings::default()),
        ContextSettings {
            mtime: 0,
            ..Default::default()
        },
        reference(tag),
        Arc::new(LayoutBackend::new(out.to_path_buf())),
    )
}
