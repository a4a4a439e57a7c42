//! Resolve-image command

use anyhow::{Context, Result};
use drover_runtime::helm::ImagePathSpec;
use drover_runtime::helm::resolve::{assign_image_data, replace_image};

/// Builds the image path spec from `component=path` pairs
fn path_spec(paths: &[(String, String)]) -> Result<ImagePathSpec> {
    let mut spec = ImagePathSpec::default();
    for (component, path) in paths {
        match component.as_str() {
            "repo" => spec.repo = path.clone(),
            "image" => spec.image = path.clone(),
            "tag" => spec.tag = path.clone(),
            other => anyhow::bail!("unknown image component `{}`, expected repo, image or tag", other),
        }
    }
    Ok(spec)
}

/// Renders the nested values document that makes a chart pull `url`
fn image_values(url: &str, paths: &[(String, String)]) -> Result<String> {
    let spec = path_spec(paths)?;
    let values = assign_image_data(url, &spec).context("Failed to resolve image paths")?;
    replace_image("", &values).context("Failed to render values")
}

pub fn resolve_image(url: &str, paths: &[(String, String)]) -> Result<()> {
    print!("{}", image_values(url, paths)?);
    Ok(())
}
