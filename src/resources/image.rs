//! Container image resolution and version validation.

use super::GenerateError;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use regex::Regex;
use std::sync::LazyLock;

/// Oldest supported controller major version
const MIN_CONTROL_PLANE_MAJOR: u64 = 3;

/// Image of the named container in the template, falling back to `default`.
///
/// `kind` names the parent kind in the error message.
pub fn resolve_image(
    template: Option<&PodTemplateSpec>,
    container: &str,
    default: &str,
    kind: &str,
) -> Result<String, GenerateError> {
    let from_template = template
        .and_then(|t| t.spec.as_ref())
        .and_then(|spec| spec.containers.iter().find(|c| c.name == container))
        .and_then(|c| c.image.as_deref())
        .filter(|image| !image.is_empty());

    match from_template.or(Some(default).filter(|d| !d.is_empty())) {
        Some(image) => Ok(image.to_string()),
        None => Err(GenerateError::InvalidSpec(format!(
            "{kind} requires an image to be set on {container} container"
        ))),
    }
}

/// Version tag of a controller image: `3`, `3.4`, `v3.4.1`, `3.4.1-rc.1`
static VERSION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(?P<major>\d+)(\.\d+){0,2}([-+][0-9A-Za-z.-]+)?$")
        .expect("Failed to compile VERSION_TAG regex - this should never happen")
});

/// Reject controller images whose tag is not a supported version
pub fn validate_control_plane_image(image: &str) -> Result<(), GenerateError> {
    let unsupported = || {
        GenerateError::InvalidSpec(format!(
            "unsupported ControlPlane image {image}: a tag of version {MIN_CONTROL_PLANE_MAJOR}.0 or newer is required"
        ))
    };

    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let (_, tag) = last_segment.split_once(':').ok_or_else(unsupported)?;

    let major: u64 = VERSION_TAG
        .captures(tag)
        .and_then(|c| c.name("major"))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(unsupported)?;
    if major < MIN_CONTROL_PLANE_MAJOR {
        return Err(unsupported());
    }
    Ok(())
}
